use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};
use typewire_frame::{Envelope, FrameCodec};

use crate::config::Communication;
use crate::error::{PipelineError, Result};
use crate::queue::BoundedQueue;
use crate::stats::PipelineCounters;

/// Outbound pipeline: turns owned messages into frames on the link.
pub trait Serializer: Send + Sync {
    /// Frame `envelope` now or queue it. The envelope is consumed either way.
    fn send(&self, envelope: Envelope) -> Result<()>;

    /// Drop everything queued but not yet written.
    fn reset(&self);

    /// Stop accepting messages and release background resources.
    fn stop(&self);

    /// Wait until every accepted message has been written or dropped.
    /// Returns `false` if `timeout` elapsed first.
    fn flush(&self, _timeout: Duration) -> bool {
        true
    }

    fn mode(&self) -> Option<Communication>;
}

/// Frames each message on the caller's thread.
pub struct BlockingSerializer {
    codec: Arc<FrameCodec>,
}

impl BlockingSerializer {
    pub fn new(codec: Arc<FrameCodec>) -> Self {
        Self { codec }
    }
}

impl Serializer for BlockingSerializer {
    fn send(&self, envelope: Envelope) -> Result<()> {
        self.codec
            .write_frame(envelope.id(), envelope.message())
            .map_err(PipelineError::from)
    }

    fn reset(&self) {}

    fn stop(&self) {}

    fn mode(&self) -> Option<Communication> {
        Some(Communication::Blocking)
    }
}

/// Queues messages for a background writer thread.
///
/// A full queue rejects the new message with
/// [`PipelineError::QueueFull`]; nothing is retried.
pub struct QueuedSerializer {
    queue: Arc<BoundedQueue<Envelope>>,
    /// Accepted by `send` and not yet finished by the worker.
    outstanding: Arc<AtomicUsize>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<PipelineCounters>,
}

impl QueuedSerializer {
    pub(crate) fn spawn(
        codec: Arc<FrameCodec>,
        capacity: usize,
        priority: i32,
        counters: Arc<PipelineCounters>,
    ) -> Result<Self> {
        let queue = Arc::new(BoundedQueue::new(capacity));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let worker = {
            let queue = Arc::clone(&queue);
            let outstanding = Arc::clone(&outstanding);
            let counters = Arc::clone(&counters);
            std::thread::Builder::new()
                .name("typewire-tx".to_string())
                .spawn(move || write_loop(&codec, &queue, &outstanding, &counters, priority))
                .map_err(|source| PipelineError::Spawn {
                    name: "typewire-tx",
                    source,
                })?
        };
        Ok(Self {
            queue,
            outstanding,
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Messages waiting to be written.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

fn write_loop(
    codec: &FrameCodec,
    queue: &BoundedQueue<Envelope>,
    outstanding: &AtomicUsize,
    counters: &PipelineCounters,
    priority: i32,
) {
    debug!(priority, "serializer worker started");
    while let Some(envelope) = queue.pop() {
        if let Err(err) = codec.write_frame(envelope.id(), envelope.message()) {
            PipelineCounters::bump(&counters.write_failures);
            trace!(type_id = envelope.id(), error = %err, "queued frame not written");
        }
        release(outstanding, 1);
    }
    debug!("serializer worker stopped");
}

fn release(outstanding: &AtomicUsize, n: usize) {
    let _ = outstanding.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
        Some(v.saturating_sub(n))
    });
}

impl Serializer for QueuedSerializer {
    fn send(&self, envelope: Envelope) -> Result<()> {
        // counted before the push so the worker can never release first
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.queue.push(envelope) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                release(&self.outstanding, 1);
                PipelineCounters::bump(&self.counters.outbound_drops);
                debug!(
                    type_id = rejected.id(),
                    queue = "output",
                    "queue full; message dropped"
                );
                Err(PipelineError::QueueFull { queue: "output" })
            }
        }
    }

    fn reset(&self) {
        let dropped = self.queue.clear();
        release(&self.outstanding, dropped);
        if dropped > 0 {
            debug!(dropped, queue = "output", "queue reset");
        }
    }

    fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.outstanding.load(Ordering::Acquire) > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    fn stop(&self) {
        let dropped = self.queue.clear();
        release(&self.outstanding, dropped);
        self.queue.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("serializer worker panicked");
            }
        }
    }

    fn mode(&self) -> Option<Communication> {
        Some(Communication::NonBlocking)
    }
}

impl Drop for QueuedSerializer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accepts and discards every message (replay has no peer to answer).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSerializer;

impl Serializer for NullSerializer {
    fn send(&self, envelope: Envelope) -> Result<()> {
        trace!(type_id = envelope.id(), "null serializer discarded message");
        Ok(())
    }

    fn reset(&self) {}

    fn stop(&self) {}

    fn mode(&self) -> Option<Communication> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Condvar;

    use typewire_frame::FrameConfig;
    use typewire_registry::{Command, SystemCommand, TypeRegistry, SYSTEM_COMMAND_TYPE_ID};
    use typewire_transport::{Device, MemoryDevice};

    use super::*;

    fn request() -> Envelope {
        Envelope::new(
            SYSTEM_COMMAND_TYPE_ID,
            Box::new(SystemCommand::manifest_request()),
        )
    }

    fn linked_codecs() -> (Arc<FrameCodec>, Arc<FrameCodec>) {
        let (a, b) = MemoryDevice::pair();
        (
            Arc::new(FrameCodec::with_device(Arc::new(a), FrameConfig::default())),
            Arc::new(FrameCodec::with_device(Arc::new(b), FrameConfig::default())),
        )
    }

    #[test]
    fn blocking_serializer_writes_immediately() {
        let (tx, rx) = linked_codecs();
        let serializer = BlockingSerializer::new(tx);
        serializer.send(request()).unwrap();

        let registry = TypeRegistry::new();
        let env = rx.read_frame(&registry).unwrap().unwrap();
        let command = env.downcast_ref::<SystemCommand>().unwrap();
        assert!(command.is(Command::ManifestRequest));
    }

    #[test]
    fn queued_serializer_delivers_in_order() {
        let (tx, rx) = linked_codecs();
        let counters = Arc::new(PipelineCounters::default());
        let serializer = QueuedSerializer::spawn(tx, 4, 0, counters).unwrap();
        serializer.send(request()).unwrap();
        serializer
            .send(Envelope::new(
                SYSTEM_COMMAND_TYPE_ID,
                Box::new(SystemCommand::default()),
            ))
            .unwrap();

        let registry = TypeRegistry::new();
        let first = rx.read_frame(&registry).unwrap().unwrap();
        let second = rx.read_frame(&registry).unwrap().unwrap();
        assert!(first.downcast_ref::<SystemCommand>().unwrap().command.is_some());
        assert!(second.downcast_ref::<SystemCommand>().unwrap().command.is_none());
        serializer.stop();
    }

    #[test]
    fn stopped_queue_rejects_sends() {
        let (tx, _rx) = linked_codecs();
        let counters = Arc::new(PipelineCounters::default());
        let serializer = QueuedSerializer::spawn(tx, 2, 0, Arc::clone(&counters)).unwrap();
        serializer.stop();
        serializer.stop();

        assert!(matches!(
            serializer.send(request()),
            Err(PipelineError::QueueFull { queue: "output" })
        ));
        assert_eq!(counters.snapshot(Default::default()).outbound_drops, 1);
    }

    #[test]
    fn flush_waits_for_the_worker() {
        let (tx, rx) = linked_codecs();
        let serializer =
            QueuedSerializer::spawn(tx, 8, 0, Arc::new(PipelineCounters::default())).unwrap();
        for _ in 0..5 {
            serializer.send(request()).unwrap();
        }
        assert!(serializer.flush(Duration::from_secs(5)));
        assert_eq!(serializer.pending(), 0);

        let registry = TypeRegistry::new();
        for _ in 0..5 {
            assert!(rx.read_frame(&registry).unwrap().is_some());
        }
        serializer.stop();
    }

    #[test]
    fn null_serializer_swallows() {
        assert!(NullSerializer.send(request()).is_ok());
        assert_eq!(NullSerializer.mode(), None);
    }

    /// Device whose writes block until the gate opens.
    #[derive(Default)]
    struct GatedDevice {
        open: Mutex<bool>,
        changed: Condvar,
    }

    impl GatedDevice {
        fn release(&self) {
            *self.open.lock().unwrap() = true;
            self.changed.notify_all();
        }
    }

    impl Device for GatedDevice {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.changed.wait(open).unwrap();
            }
            Ok(buf.len())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&self) {
            self.release();
        }
    }

    #[test]
    fn stalled_worker_makes_excess_sends_fail_fast() {
        let device = Arc::new(GatedDevice::default());
        let codec = Arc::new(FrameCodec::with_device(
            Arc::clone(&device) as Arc<dyn Device>,
            FrameConfig::default(),
        ));
        let counters = Arc::new(PipelineCounters::default());
        let serializer = QueuedSerializer::spawn(codec, 2, 0, Arc::clone(&counters)).unwrap();

        // the worker takes the first message and stalls inside the write
        serializer.send(request()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while serializer.pending() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        serializer.send(request()).unwrap();
        serializer.send(request()).unwrap();
        let started = Instant::now();
        for _ in 0..5 {
            assert!(matches!(
                serializer.send(request()),
                Err(PipelineError::QueueFull { .. })
            ));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(serializer.pending(), 2);
        assert_eq!(counters.snapshot(Default::default()).outbound_drops, 5);
        assert!(!serializer.flush(Duration::from_millis(20)));

        device.release();
        serializer.stop();
    }
}
