use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::error::{Result, TransportError};

/// A raw, bidirectional byte channel.
///
/// Methods take `&self`: one bound device is read by a decoder thread and
/// written by an encoder thread concurrently, and may be closed from a third.
/// Implementations follow `std::io::Read`/`Write` semantics: short reads and
/// writes are allowed, `Ok(0)` from `read` means end of stream.
pub trait Device: Send + Sync {
    /// Read up to `buf.len()` bytes (blocking).
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write up to `buf.len()` bytes (blocking).
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Flush buffered output, if any.
    fn flush(&self) -> std::io::Result<()> {
        Ok(())
    }

    /// Whether the device is still usable.
    fn is_open(&self) -> bool;

    /// Close the device.
    ///
    /// Where the platform allows it, a reader blocked inside [`Device::read`]
    /// returns promptly afterwards.
    fn close(&self);

    /// Short name used in diagnostics.
    fn name(&self) -> &str {
        "device"
    }
}

/// How a file-backed device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Read-only; used to replay a recorded stream.
    Read,
    /// Write-only, created and truncated; used for recording logs.
    Write,
    /// Read-write on an existing node (character devices, FIFOs).
    ReadWrite,
}

/// A [`Device`] over an OS stream handle.
pub struct StreamDevice {
    inner: StreamInner,
    name: String,
    open: AtomicBool,
    /// Serial lines are configured with a read timeout; a zero-length read
    /// then means "nothing yet" rather than end of stream.
    retry_empty_reads: bool,
}

enum StreamInner {
    File(File),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl StreamDevice {
    /// Open a file-backed device.
    pub fn open_file(path: impl AsRef<Path>, mode: FileMode) -> Result<Self> {
        let path = path.as_ref();
        let mut options = OpenOptions::new();
        match mode {
            FileMode::Read => options.read(true),
            FileMode::Write => options.write(true).create(true).truncate(true),
            FileMode::ReadWrite => options.read(true).write(true),
        };
        let file = options.open(path).map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?path, ?mode, "opened file device");
        Ok(Self::from_file(file, path.display().to_string()))
    }

    /// Wrap an already opened file.
    pub fn from_file(file: File, name: impl Into<String>) -> Self {
        Self {
            inner: StreamInner::File(file),
            name: name.into(),
            open: AtomicBool::new(true),
            retry_empty_reads: false,
        }
    }

    /// Wrap a connected Unix stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream, name: impl Into<String>) -> Self {
        Self {
            inner: StreamInner::Unix(stream),
            name: name.into(),
            open: AtomicBool::new(true),
            retry_empty_reads: false,
        }
    }

    /// Wrap a TTY configured with a read timeout.
    #[cfg(unix)]
    pub(crate) fn from_tty(file: File, name: impl Into<String>) -> Self {
        Self {
            retry_empty_reads: true,
            ..Self::from_file(file, name)
        }
    }

    fn read_once(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &self.inner {
            StreamInner::File(file) => (&*file).read(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).read(buf),
        }
    }
}

impl Device for StreamDevice {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if !self.is_open() {
                return Ok(0);
            }
            let n = self.read_once(buf)?;
            if n == 0 && self.retry_empty_reads && !buf.is_empty() {
                continue;
            }
            return Ok(n);
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        if !self.is_open() {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        }
        match &self.inner {
            StreamInner::File(file) => (&*file).write(buf),
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).write(buf),
        }
    }

    fn flush(&self) -> std::io::Result<()> {
        match &self.inner {
            StreamInner::File(file) => (&*file).flush(),
            #[cfg(unix)]
            StreamInner::Unix(stream) => (&*stream).flush(),
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        debug!(device = %self.name, "closing device");
        match &self.inner {
            StreamInner::File(_) => {}
            #[cfg(unix)]
            StreamInner::Unix(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for StreamDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            StreamInner::File(_) if self.retry_empty_reads => "serial",
            StreamInner::File(_) => "file",
            #[cfg(unix)]
            StreamInner::Unix(_) => "unix",
        };
        f.debug_struct("StreamDevice")
            .field("type", &kind)
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}
