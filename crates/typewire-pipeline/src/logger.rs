use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use typewire_frame::{Envelope, FrameCodec, FrameConfig, LinkStats};
use typewire_registry::{Manifest, MANIFEST_TYPE_ID};
use typewire_transport::{Device, FileMode, StreamDevice};

use crate::error::Result;

/// Write-only recording sink.
///
/// Frames are written exactly as on the live link, so a log file is itself
/// a stream that [`replay`](crate::replay) can read back. A log starts with
/// the local manifest; every later frame uses local type ids.
pub struct Logger {
    codec: FrameCodec,
    path: Option<PathBuf>,
}

impl Logger {
    /// Log to an arbitrary device.
    pub fn new(device: Arc<dyn Device>, config: FrameConfig) -> Self {
        Self {
            codec: FrameCodec::with_device(device, config),
            path: None,
        }
    }

    /// Create (or truncate) a log file at `path`.
    pub fn create(path: impl AsRef<Path>, config: FrameConfig) -> Result<Self> {
        let path = path.as_ref();
        let device = StreamDevice::open_file(path, FileMode::Write)?;
        info!(path = %path.display(), "log file created");
        Ok(Self {
            codec: FrameCodec::with_device(Arc::new(device), config),
            path: Some(path.to_path_buf()),
        })
    }

    /// Record the manifest that gives later frames their meaning.
    pub fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.codec.write_frame(MANIFEST_TYPE_ID, manifest)?;
        debug!(records = manifest.len(), "manifest logged");
        Ok(())
    }

    /// Record one message under its local id.
    pub fn log(&self, envelope: &Envelope) -> Result<()> {
        self.codec.write_frame(envelope.id(), envelope.message())?;
        Ok(())
    }

    /// Stop the sink and close its device.
    pub fn close(&self) {
        self.codec.stop();
    }

    pub fn is_functional(&self) -> bool {
        self.codec.is_functional()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn stats(&self) -> LinkStats {
        self.codec.stats()
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("path", &self.path)
            .field("state", &self.codec.state())
            .finish()
    }
}

/// Logger slot that can be filled or emptied while a pipeline runs.
#[derive(Debug, Clone, Default)]
pub(crate) struct LoggerSlot {
    inner: Arc<Mutex<Option<Logger>>>,
}

impl LoggerSlot {
    fn lock(&self) -> MutexGuard<'_, Option<Logger>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn attach(&self, logger: Logger) -> Option<Logger> {
        self.lock().replace(logger)
    }

    pub(crate) fn detach(&self) -> Option<Logger> {
        self.lock().take()
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.lock().is_some()
    }

    /// Log `envelope` if a logger is attached; returns whether it was written.
    pub(crate) fn log(&self, envelope: &Envelope) -> bool {
        let guard = self.lock();
        let Some(logger) = guard.as_ref() else {
            return false;
        };
        match logger.log(envelope) {
            Ok(()) => true,
            Err(err) => {
                debug!(type_id = envelope.id(), error = %err, "log write failed");
                false
            }
        }
    }
}
