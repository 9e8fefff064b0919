use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::endian::Endianness;
use crate::message::TypeId;

/// First byte of every frame.
pub const SYNC_BYTE: u8 = 0xAB;

/// Frame preamble: sync (1) + type id (1) + header checksum (1).
pub const HEADER_SIZE: usize = 3;

/// Default upper bound for decoded strings and manifests: 64 KiB.
pub const DEFAULT_MAX_STRING_LEN: usize = 64 * 1024;

/// Header checksum for `id`, chosen so that `sync + id + checksum ≡ 255`.
pub fn header_checksum(id: TypeId) -> u8 {
    255u8.wrapping_sub(SYNC_BYTE).wrapping_sub(id)
}

/// Whether three bytes form a valid preamble (ignoring type enablement).
pub fn is_valid_header(sync: u8, id: TypeId, checksum: u8) -> bool {
    sync == SYNC_BYTE && sync.wrapping_add(id).wrapping_add(checksum) == 255
}

/// Append the 3-byte preamble for `id` to `dst`.
pub fn encode_header(id: TypeId, dst: &mut BytesMut) {
    dst.reserve(HEADER_SIZE);
    dst.put_u8(SYNC_BYTE);
    dst.put_u8(id);
    dst.put_u8(header_checksum(id));
}

/// Configuration for the frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Byte order of multi-byte primitives on the wire.
    pub endianness: Endianness,
    /// Largest string (and manifest record count) accepted from the wire.
    pub max_string_len: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            endianness: Endianness::Native,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}
