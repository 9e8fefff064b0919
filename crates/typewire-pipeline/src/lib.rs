//! Serialization service for typewire links.
//!
//! A [`SerializationManager`] owns a [`TypeRegistry`](typewire_registry::TypeRegistry)
//! and, once started on a device, runs:
//!
//! - a [`Serializer`] that frames outbound messages, on the caller's thread
//!   or through a bounded queue drained by a writer thread;
//! - a [`Deserializer`] that decodes inbound frames and routes them to the
//!   registry (manifests, manifest requests) or to the [`InputHandler`];
//! - a [`ManifestRequester`] that asks the peer for its manifest until one
//!   arrives.
//!
//! Drops are best-effort and never reported to the peer, but every one of
//! them is counted in [`PipelineStats`]. Accepted traffic can be recorded
//! with a [`Logger`] and dispatched again offline with [`replay`].

pub mod config;
pub mod deserializer;
pub mod error;
pub mod handler;
pub mod logger;
pub mod manager;
pub mod queue;
pub mod replay;
pub mod requester;
pub mod serializer;
pub mod stats;

pub use config::{Communication, ManifestPolicy, ServiceConfig};
pub use deserializer::Deserializer;
pub use error::{PipelineError, Result};
pub use handler::{DiscardHandler, InputHandler};
pub use logger::Logger;
pub use manager::SerializationManager;
pub use queue::BoundedQueue;
pub use replay::{replay, replay_file};
pub use requester::ManifestRequester;
pub use serializer::{BlockingSerializer, NullSerializer, QueuedSerializer, Serializer};
pub use stats::PipelineStats;
