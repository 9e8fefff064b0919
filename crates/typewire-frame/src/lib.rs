//! Self-synchronizing, checksummed framing for typewire links.
//!
//! Every message travels as one frame:
//!
//! ```text
//! ┌────────┬─────────┬───────────┬──────────────┬──────────────┐
//! │ 0xAB   │ type id │ header cs │ payload      │ payload cs   │
//! │ (1B)   │ (1B)    │ (1B)      │ (N bytes)    │ (1B)         │
//! └────────┴─────────┴───────────┴──────────────┴──────────────┘
//! ```
//!
//! The header checksum makes `sync + id + cs ≡ 255 (mod 256)`; the payload
//! checksum is the 8-bit sum of every payload byte. There is no length
//! field: a reader finds frames by scanning for a valid header, and every
//! frame re-earns its sync. Corrupted frames are dropped and scanning
//! resumes, so a noisy serial line degrades to lost messages instead of a
//! dead link.

pub mod codec;
pub mod endian;
pub mod error;
pub mod link;
pub mod message;
pub mod reader;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use codec::{
    encode_header, header_checksum, is_valid_header, FrameConfig, DEFAULT_MAX_STRING_LEN,
    HEADER_SIZE, SYNC_BYTE,
};
pub use endian::Endianness;
pub use error::{FrameError, Result};
pub use link::{FrameCodec, LinkState, LinkStats};
pub use message::{AsAny, Envelope, Message, TypeId, TypeResolver, TypeVersion};
pub use reader::{FrameReader, WireReader};
pub use writer::{encode_frame, FrameWriter, WireWriter};
