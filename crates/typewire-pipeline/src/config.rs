use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typewire_frame::{Endianness, FrameConfig, DEFAULT_MAX_STRING_LEN};

use crate::error::{PipelineError, Result};

/// Scheduling model of one pipeline direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Communication {
    /// The caller's thread performs the frame I/O.
    Blocking,
    /// A background thread performs the I/O, fed through a bounded queue.
    #[default]
    NonBlocking,
}

/// Whether types must be negotiated before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestPolicy {
    /// Exchange manifests; types stay disabled until the peer confirms them.
    #[default]
    Required,
    /// Assume the peer numbers types identically and enable everything.
    Ignore,
}

/// Deployment configuration of a serialization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub serialization: Communication,
    pub deserialization: Communication,
    pub endianness: Endianness,
    pub manifest: ManifestPolicy,
    /// Capacity of the inbound queue (non-blocking deserialization).
    pub input_queue_size: usize,
    /// Capacity of the outbound queue (non-blocking serialization).
    pub output_queue_size: usize,
    /// Base priority of pipeline threads. Reported only on hosted targets.
    pub base_priority: i32,
    /// Interval between manifest requests while negotiating.
    pub manifest_request_interval_ms: u64,
    /// Largest string or manifest accepted from the wire.
    pub max_string_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            serialization: Communication::NonBlocking,
            deserialization: Communication::NonBlocking,
            endianness: Endianness::Native,
            manifest: ManifestPolicy::Required,
            input_queue_size: 10,
            output_queue_size: 10,
            base_priority: 0,
            manifest_request_interval_ms: 1000,
            max_string_len: DEFAULT_MAX_STRING_LEN,
        }
    }
}

impl ServiceConfig {
    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("failed reading {}: {err}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.serialization == Communication::NonBlocking && self.output_queue_size == 0 {
            return Err(PipelineError::Config(
                "output_queue_size must be at least 1".to_string(),
            ));
        }
        if self.deserialization == Communication::NonBlocking && self.input_queue_size == 0 {
            return Err(PipelineError::Config(
                "input_queue_size must be at least 1".to_string(),
            ));
        }
        if self.manifest == ManifestPolicy::Required && self.manifest_request_interval_ms == 0 {
            return Err(PipelineError::Config(
                "manifest_request_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn manifest_request_interval(&self) -> Duration {
        Duration::from_millis(self.manifest_request_interval_ms)
    }

    /// Codec settings derived from this configuration.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            endianness: self.endianness,
            max_string_len: self.max_string_len,
        }
    }
}
