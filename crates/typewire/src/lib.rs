//! Typed, checksummed message framing for serial lines and byte streams.
//!
//! Two endpoints that were built separately agree on message numbering at
//! run time by exchanging manifests, then trade checksummed frames over any
//! byte device.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte devices (serial lines, Unix sockets, files, memory)
//! - [`frame`]: the wire format and the link codec
//! - [`registry`]: type registration and manifest negotiation
//! - [`pipeline`]: serializer/deserializer pipelines and the service
//!   manager (behind the `pipeline` feature)
//! - [`messages`]: demo payload types used by the `typewire` binary

/// Re-export transport types.
pub mod transport {
    pub use typewire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use typewire_frame::*;
}

/// Re-export registry types.
pub mod registry {
    pub use typewire_registry::*;
}

/// Re-export pipeline types (requires `pipeline` feature).
#[cfg(feature = "pipeline")]
pub mod pipeline {
    pub use typewire_pipeline::*;
}

pub mod messages;
