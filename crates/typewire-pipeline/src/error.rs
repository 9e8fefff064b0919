use std::time::Duration;

use typewire_frame::TypeId;

/// Errors that can occur in pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] typewire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] typewire_frame::FrameError),

    /// Type registration error.
    #[error("registry error: {0}")]
    Registry(#[from] typewire_registry::RegistryError),

    /// No service is running.
    #[error("service not running")]
    NotRunning,

    /// The link is stopped or failed.
    #[error("link not functional")]
    NotFunctional,

    /// The message type was never registered.
    #[error("message type not registered")]
    Unregistered,

    /// The peer has not confirmed this type.
    #[error("type {0} not enabled")]
    TypeDisabled(TypeId),

    /// A bounded queue was full; the message was dropped.
    #[error("{queue} queue full")]
    QueueFull { queue: &'static str },

    /// Invalid service configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipeline thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Waiting for a condition timed out.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl PipelineError {
    /// Whether this is a best-effort send rejection (the message was
    /// dropped, the service keeps running).
    pub fn is_send_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::NotRunning
                | PipelineError::NotFunctional
                | PipelineError::Unregistered
                | PipelineError::TypeDisabled(_)
                | PipelineError::QueueFull { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_rejections_are_classified() {
        assert!(PipelineError::TypeDisabled(4).is_send_rejection());
        assert!(PipelineError::QueueFull { queue: "output" }.is_send_rejection());
        assert!(!PipelineError::Config("x".into()).is_send_rejection());
        assert!(!PipelineError::Timeout(Duration::from_secs(1)).is_send_rejection());
    }
}
