use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, trace, warn};
use typewire_frame::{Envelope, FrameCodec, FrameError};
use typewire_registry::{
    Command, Manifest, SystemCommand, TypeRegistry, MANIFEST_TYPE_ID, SYSTEM_COMMAND_TYPE_ID,
};

use crate::config::Communication;
use crate::error::{PipelineError, Result};
use crate::handler::InputHandler;
use crate::logger::LoggerSlot;
use crate::queue::BoundedQueue;
use crate::serializer::Serializer;
use crate::stats::PipelineCounters;

/// Routes each decoded message to the registry, the input handler, or
/// nowhere.
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) serializer: Arc<dyn Serializer>,
    pub(crate) handler: Arc<dyn InputHandler>,
    pub(crate) logger: LoggerSlot,
    pub(crate) counters: Arc<PipelineCounters>,
}

impl Dispatcher {
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        match envelope.id() {
            MANIFEST_TYPE_ID => {
                if let Some(manifest) = envelope.downcast_ref::<Manifest>() {
                    let matched = self.registry.apply_manifest(manifest);
                    PipelineCounters::bump(&self.counters.manifests_applied);
                    debug!(records = manifest.len(), matched, "manifest applied");
                }
            }
            SYSTEM_COMMAND_TYPE_ID => {
                let is_request = envelope
                    .downcast_ref::<SystemCommand>()
                    .is_some_and(|cmd| cmd.is(Command::ManifestRequest));
                if is_request {
                    debug!("manifest requested by peer");
                    self.send_manifest();
                    PipelineCounters::bump(&self.counters.manifest_requests_answered);
                }
            }
            id if self.registry.is_own_enabled(id) => {
                self.handler.process(&envelope);
                PipelineCounters::bump(&self.counters.dispatched);
                if self.logger.log(&envelope) {
                    PipelineCounters::bump(&self.counters.logged);
                }
            }
            id => trace!(type_id = id, "message of disabled type dropped"),
        }
    }

    /// Flush pending output and send the local manifest.
    pub(crate) fn send_manifest(&self) {
        self.serializer.reset();
        let manifest = self.registry.extract_manifest();
        let envelope = Envelope::new(MANIFEST_TYPE_ID, Box::new(manifest));
        if let Err(err) = self.serializer.send(envelope) {
            debug!(error = %err, "manifest not sent");
        }
    }
}

/// Inbound pipeline.
///
/// Blocking mode runs one thread that decodes and dispatches. Non-blocking
/// mode runs a reader thread that queues decoded messages and a dispatch
/// thread that drains the whole queue per wake-up, in arrival order. Peer
/// manifests are applied by the reader itself before it decodes the next
/// frame.
pub struct Deserializer {
    mode: Communication,
    input: Option<Arc<BoundedQueue<Envelope>>>,
    reader: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
}

impl Deserializer {
    pub(crate) fn spawn(
        mode: Communication,
        codec: Arc<FrameCodec>,
        dispatcher: Arc<Dispatcher>,
        input_capacity: usize,
        priority: i32,
    ) -> Result<Self> {
        match mode {
            Communication::Blocking => {
                let reader = spawn_named("typewire-rx", move || {
                    debug!(priority, mode = "blocking", "deserializer started");
                    read_loop(&codec, &dispatcher.registry, |envelope| {
                        dispatcher.dispatch(envelope)
                    });
                })?;
                Ok(Self {
                    mode,
                    input: None,
                    reader: Some(reader),
                    dispatcher: None,
                })
            }
            Communication::NonBlocking => {
                let input = Arc::new(BoundedQueue::new(input_capacity));

                let drain = {
                    let input = Arc::clone(&input);
                    let dispatcher = Arc::clone(&dispatcher);
                    spawn_named("typewire-dispatch", move || {
                        while let Some(batch) = input.pop_all() {
                            trace!(batch = batch.len(), "dispatching batch");
                            for envelope in batch {
                                dispatcher.dispatch(envelope);
                            }
                        }
                    })?
                };

                let reader = {
                    let queue = Arc::clone(&input);
                    let spawned = spawn_named("typewire-rx", move || {
                        debug!(priority, mode = "non_blocking", "deserializer started");
                        let registry = Arc::clone(&dispatcher.registry);
                        read_loop(&codec, &registry, |envelope| {
                            // applied here so the very next header already
                            // resolves against the new mapping
                            if envelope.id() == MANIFEST_TYPE_ID {
                                dispatcher.dispatch(envelope);
                                return;
                            }
                            if !registry.is_own_enabled(envelope.id()) {
                                trace!(type_id = envelope.id(), "type disabled before queueing");
                                return;
                            }
                            if let Err(rejected) = queue.push(envelope) {
                                PipelineCounters::bump(&dispatcher.counters.inbound_drops);
                                debug!(
                                    type_id = rejected.id(),
                                    queue = "input",
                                    "queue full; message dropped"
                                );
                            }
                        });
                        queue.close();
                    });
                    match spawned {
                        Ok(reader) => reader,
                        Err(err) => {
                            input.close();
                            let _ = drain.join();
                            return Err(err);
                        }
                    }
                };

                Ok(Self {
                    mode,
                    input: Some(input),
                    reader: Some(reader),
                    dispatcher: Some(drain),
                })
            }
        }
    }

    pub fn mode(&self) -> Communication {
        self.mode
    }

    /// Wait for the pipeline threads to finish.
    ///
    /// The link must already be stopped so the reader thread wakes up.
    pub(crate) fn join(&mut self) {
        join_thread(self.reader.take(), "reader");
        if let Some(input) = &self.input {
            input.close();
        }
        join_thread(self.dispatcher.take(), "dispatcher");
    }
}

impl Drop for Deserializer {
    fn drop(&mut self) {
        if let Some(input) = &self.input {
            input.close();
        }
    }
}

/// Decode frames until the link stops or fails; returns the error that
/// ended the loop.
pub(crate) fn read_loop(
    codec: &FrameCodec,
    registry: &TypeRegistry,
    mut deliver: impl FnMut(Envelope),
) -> FrameError {
    loop {
        match codec.read_frame(registry) {
            Ok(Some(envelope)) => deliver(envelope),
            Ok(None) => continue,
            Err(FrameError::Stopped) => {
                debug!("deserializer stopped");
                return FrameError::Stopped;
            }
            Err(FrameError::ConnectionClosed) => {
                debug!("input closed");
                return FrameError::ConnectionClosed;
            }
            Err(err) => {
                warn!(error = %err, "deserializer halted on link failure");
                return err;
            }
        }
    }
}

fn spawn_named<F>(name: &'static str, body: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|source| PipelineError::Spawn { name, source })
}

fn join_thread(handle: Option<JoinHandle<()>>, role: &str) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == std::thread::current().id() {
        return;
    }
    if handle.join().is_err() {
        warn!(role, "deserializer thread panicked");
    }
}
