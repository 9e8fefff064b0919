//! Raw byte device abstraction for typewire links.
//!
//! The framing layer only needs a bidirectional byte channel that can be read
//! and written from two threads at once and closed from a third. This crate
//! provides that contract ([`Device`]) and the adapters used in practice:
//! - serial lines (UART) configured as raw 8N1 TTYs
//! - plain files (recorded logs, replay sources)
//! - Unix domain sockets
//! - in-memory pipes for tests and in-process links
//!
//! This is the lowest layer of typewire. Everything else builds on top of
//! the [`Device`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use memory::MemoryDevice;
pub use traits::{Device, FileMode, StreamDevice};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
