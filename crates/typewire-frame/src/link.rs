use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, trace, warn};
use typewire_transport::Device;

use crate::codec::{FrameConfig, SYNC_BYTE};
use crate::error::{FrameError, Result};
use crate::message::{Envelope, Message, TypeId, TypeResolver};
use crate::reader::{FrameReader, WireReader};
use crate::writer::FrameWriter;

/// Connection state of a [`FrameCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// No device bound. Initial state, and the state after [`FrameCodec::stop`].
    Stopped,
    /// Device bound, scanning for a valid frame header.
    WaitingSync,
    /// A header was validated; its payload is being decoded.
    Readable,
    /// An I/O failure occurred. Sticky until [`FrameCodec::start`].
    Error,
}

impl LinkState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => LinkState::WaitingSync,
            2 => LinkState::Readable,
            3 => LinkState::Error,
            _ => LinkState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LinkState::Stopped => 0,
            LinkState::WaitingSync => 1,
            LinkState::Readable => 2,
            LinkState::Error => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Stopped => "stopped",
            LinkState::WaitingSync => "waiting_sync",
            LinkState::Readable => "readable",
            LinkState::Error => "error",
        }
    }
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
struct LinkCounters {
    frames_written: AtomicU64,
    frames_decoded: AtomicU64,
    bytes_discarded: AtomicU64,
    header_rejects: AtomicU64,
    checksum_failures: AtomicU64,
    unresolved: AtomicU64,
}

/// Snapshot of per-link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub frames_written: u64,
    pub frames_decoded: u64,
    /// Bytes skipped while looking for a sync marker.
    pub bytes_discarded: u64,
    /// Candidate headers rejected (disabled type id or bad header checksum).
    pub header_rejects: u64,
    /// Frames whose payload failed validation and were dropped.
    pub checksum_failures: u64,
    /// Valid headers whose type could not be instantiated.
    pub unresolved: u64,
}

struct ReadHalf {
    device: Option<Arc<dyn Device>>,
    frames: FrameReader,
}

struct WriteHalf {
    device: Option<Arc<dyn Device>>,
    frames: FrameWriter,
}

/// Frame codec bound to one [`Device`].
///
/// Reading and writing are independent: one thread may block in
/// [`read_frame`](Self::read_frame) while others call
/// [`write_frame`](Self::write_frame). Writes are serialized so frames never
/// interleave on the wire.
pub struct FrameCodec {
    config: FrameConfig,
    state: AtomicU8,
    device: Mutex<Option<Arc<dyn Device>>>,
    reader: Mutex<ReadHalf>,
    writer: Mutex<WriteHalf>,
    counters: LinkCounters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameCodec {
    /// A stopped codec with no device bound.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            state: AtomicU8::new(LinkState::Stopped.as_u8()),
            device: Mutex::new(None),
            reader: Mutex::new(ReadHalf {
                device: None,
                frames: FrameReader::new(config),
            }),
            writer: Mutex::new(WriteHalf {
                device: None,
                frames: FrameWriter::new(config),
            }),
            counters: LinkCounters::default(),
        }
    }

    /// A codec already started on `device`.
    pub fn with_device(device: Arc<dyn Device>, config: FrameConfig) -> Self {
        let codec = Self::new(config);
        codec.start(device);
        codec
    }

    /// Bind `device` and begin scanning for frames.
    ///
    /// Enters `WaitingSync` if the device is open, `Error` otherwise. Any
    /// bytes buffered from a previous device are dropped.
    pub fn start(&self, device: Arc<dyn Device>) {
        let open = device.is_open();
        let name = device.name().to_string();
        *lock(&self.device) = Some(Arc::clone(&device));
        {
            let mut writer = lock(&self.writer);
            writer.device = Some(Arc::clone(&device));
        }
        {
            let mut reader = lock(&self.reader);
            reader.frames.clear();
            reader.device = Some(device);
        }
        let next = if open {
            LinkState::WaitingSync
        } else {
            LinkState::Error
        };
        self.state.store(next.as_u8(), Ordering::Release);
        debug!(device = %name, state = %next, "link started");
    }

    /// Enter `Stopped` and close the bound device.
    ///
    /// Closing the device unblocks a reader waiting inside it; the reader
    /// then returns [`FrameError::Stopped`].
    pub fn stop(&self) {
        let previous = self.state.swap(LinkState::Stopped.as_u8(), Ordering::AcqRel);
        if let Some(device) = lock(&self.device).take() {
            device.close();
        }
        lock(&self.writer).device = None;
        if LinkState::from_u8(previous) != LinkState::Stopped {
            debug!(previous = %LinkState::from_u8(previous), "link stopped");
        }
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the link can carry traffic (neither `Stopped` nor `Error`).
    pub fn is_functional(&self) -> bool {
        matches!(self.state(), LinkState::WaitingSync | LinkState::Readable)
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == LinkState::Stopped
    }

    pub fn is_error(&self) -> bool {
        self.state() == LinkState::Error
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }

    pub fn stats(&self) -> LinkStats {
        let c = &self.counters;
        LinkStats {
            frames_written: c.frames_written.load(Ordering::Relaxed),
            frames_decoded: c.frames_decoded.load(Ordering::Relaxed),
            bytes_discarded: c.bytes_discarded.load(Ordering::Relaxed),
            header_rejects: c.header_rejects.load(Ordering::Relaxed),
            checksum_failures: c.checksum_failures.load(Ordering::Relaxed),
            unresolved: c.unresolved.load(Ordering::Relaxed),
        }
    }

    fn transition(&self, from: LinkState, to: LinkState) {
        let _ = self.state.compare_exchange(
            from.as_u8(),
            to.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Enter `Error` unless the link was stopped in the meantime.
    fn fail(&self, err: &FrameError) {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match LinkState::from_u8(raw) {
                    LinkState::Stopped | LinkState::Error => None,
                    _ => Some(LinkState::Error.as_u8()),
                }
            });
        if result.is_ok() {
            warn!(error = %err, "link failed");
        }
    }

    fn ensure_functional(&self) -> Result<()> {
        match self.state() {
            LinkState::Stopped => Err(FrameError::Stopped),
            LinkState::Error => Err(FrameError::NotFunctional),
            _ => Ok(()),
        }
    }

    /// Frame and write one message (blocking).
    ///
    /// Any I/O failure moves the link to `Error`.
    pub fn write_frame(&self, id: TypeId, message: &dyn Message) -> Result<()> {
        self.ensure_functional()?;
        let mut writer = lock(&self.writer);
        let Some(device) = writer.device.clone() else {
            return Err(FrameError::Stopped);
        };
        match writer.frames.write_frame(&*device, id, message) {
            Ok(len) => {
                self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
                trace!(type_id = id, len, "frame written");
                Ok(())
            }
            Err(err) => {
                if err.is_recoverable() {
                    return Err(err);
                }
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns `Ok(None)` when a frame was consumed but yielded no message:
    /// the payload checksum failed, a length was implausible, or the type
    /// could not be instantiated. Returns `Err` only for link failures, after
    /// which the state is `Error` (or `Stopped` if the link was stopped).
    pub fn read_frame(&self, resolver: &dyn TypeResolver) -> Result<Option<Envelope>> {
        self.ensure_functional()?;
        let mut guard = lock(&self.reader);
        let half = &mut *guard;
        let Some(device) = half.device.clone() else {
            return Err(FrameError::Stopped);
        };

        let result = self
            .read_header(&mut half.frames, &*device, resolver)
            .and_then(|foreign| self.read_payload(&mut half.frames, &*device, resolver, foreign));
        self.transition(LinkState::Readable, LinkState::WaitingSync);

        match result {
            Ok(envelope) => {
                if envelope.is_some() {
                    self.counters.frames_decoded.fetch_add(1, Ordering::Relaxed);
                }
                Ok(envelope)
            }
            Err(err) if err.is_recoverable() => {
                self.counters
                    .checksum_failures
                    .fetch_add(1, Ordering::Relaxed);
                debug!(error = %err, "frame dropped");
                Ok(None)
            }
            Err(_) if self.is_stopped() => Err(FrameError::Stopped),
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Scan for a valid header and return its (foreign) type id.
    ///
    /// A rejected candidate is never thrown away whole: scanning resumes
    /// from its last byte, which may itself be the next sync marker.
    fn read_header(
        &self,
        frames: &mut FrameReader,
        device: &dyn Device,
        resolver: &dyn TypeResolver,
    ) -> Result<TypeId> {
        let mut sync = frames.next_byte(device)?;
        loop {
            if self.is_stopped() {
                return Err(FrameError::Stopped);
            }
            if sync != SYNC_BYTE {
                self.counters.bytes_discarded.fetch_add(1, Ordering::Relaxed);
                sync = frames.next_byte(device)?;
                continue;
            }

            let id = frames.next_byte(device)?;
            if !resolver.is_foreign_enabled(id) {
                self.counters.header_rejects.fetch_add(1, Ordering::Relaxed);
                trace!(foreign_id = id, "type not enabled; rescanning");
                sync = id;
                continue;
            }

            let checksum = frames.next_byte(device)?;
            if sync.wrapping_add(id).wrapping_add(checksum) != 255 {
                self.counters.header_rejects.fetch_add(1, Ordering::Relaxed);
                trace!(foreign_id = id, checksum, "bad header checksum; rescanning");
                sync = checksum;
                continue;
            }

            self.transition(LinkState::WaitingSync, LinkState::Readable);
            return Ok(id);
        }
    }

    fn read_payload(
        &self,
        frames: &mut FrameReader,
        device: &dyn Device,
        resolver: &dyn TypeResolver,
        foreign: TypeId,
    ) -> Result<Option<Envelope>> {
        let Some((local, mut body)) = resolver.instantiate_foreign(foreign) else {
            self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
            debug!(foreign_id = foreign, "no factory for enabled type");
            return Ok(None);
        };

        let mut wire = WireReader::new(frames, device);
        body.read(&mut wire)?;
        let computed = wire.checksum();
        let expected = frames.next_byte(device)?;
        if expected != computed {
            return Err(FrameError::ChecksumMismatch { expected, computed });
        }
        Ok(Some(Envelope::new(local, body)))
    }
}

impl std::fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCodec")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
