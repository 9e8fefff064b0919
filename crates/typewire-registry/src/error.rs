use typewire_frame::TypeVersion;

/// Errors that can occur while registering types.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Every assignable type id is taken.
    #[error("type id space exhausted ({max} types registered)")]
    Exhausted { max: usize },

    /// The Rust type is already registered.
    #[error("type already registered as {name:?}")]
    DuplicateType { name: String },

    /// Another type is already registered under this name and version.
    #[error("type name {name:?} version {version} already registered")]
    DuplicateName { name: String, version: TypeVersion },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
