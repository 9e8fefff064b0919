use serde::{Deserialize, Serialize};

/// Byte order policy for multi-byte primitives.
///
/// Values travel in this host's native order unless the policy asks for a
/// swap. Both peers must agree: a little-endian MCU talking to a big-endian
/// host sets `Swap` on one side only, or `Little` on both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Native order on the wire.
    #[default]
    Native,
    /// Reverse every multi-byte value.
    Swap,
    /// No normalisation at all.
    Ignore,
    /// Little-endian on the wire regardless of the host.
    Little,
    /// Big-endian on the wire regardless of the host.
    Big,
}

impl Endianness {
    /// Whether multi-byte values are byte-swapped on this host.
    pub fn swaps(self) -> bool {
        match self {
            Endianness::Native | Endianness::Ignore => false,
            Endianness::Swap => true,
            Endianness::Little => cfg!(target_endian = "big"),
            Endianness::Big => cfg!(target_endian = "little"),
        }
    }

    #[inline]
    pub fn fix16(self, v: u16) -> u16 {
        if self.swaps() {
            v.swap_bytes()
        } else {
            v
        }
    }

    #[inline]
    pub fn fix32(self, v: u32) -> u32 {
        if self.swaps() {
            v.swap_bytes()
        } else {
            v
        }
    }

    #[inline]
    pub fn fix64(self, v: u64) -> u64 {
        if self.swaps() {
            v.swap_bytes()
        } else {
            v
        }
    }
}
