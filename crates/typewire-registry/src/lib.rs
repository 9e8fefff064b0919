//! Type registry and manifest negotiation for typewire links.
//!
//! Two endpoints built separately number their message types separately.
//! Each side sends a [`Manifest`] of `(id, version, name)` records; the
//! receiver matches records against its own types by name and version,
//! builds a foreign-to-local id table and enables the matches. Only enabled
//! types may be sent or accepted.

pub mod command;
pub mod config;
pub mod error;
pub mod manifest;
pub mod registry;

pub use command::{Command, SystemCommand, CMD_BEGIN, CMD_END};
pub use config::RegistryConfig;
pub use error::{RegistryError, Result};
pub use manifest::{Manifest, ManifestEntry};
pub use registry::{
    TypeDescriptor, TypeRegistry, FIRST_USER_TYPE_ID, INVALID_TYPE_ID, MANIFEST_TYPE_ID,
    MANIFEST_TYPE_NAME, MAX_TYPES, SYSTEM_COMMAND_TYPE_ID, SYSTEM_COMMAND_TYPE_NAME,
};
