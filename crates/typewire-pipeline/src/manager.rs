use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use typewire_frame::{Envelope, FrameCodec, LinkState, LinkStats, Message, TypeId, TypeVersion};
use typewire_registry::{TypeRegistry, MANIFEST_TYPE_ID};
use typewire_transport::Device;

use crate::config::{Communication, ManifestPolicy, ServiceConfig};
use crate::deserializer::{Deserializer, Dispatcher};
use crate::error::{PipelineError, Result};
use crate::handler::InputHandler;
use crate::logger::{Logger, LoggerSlot};
use crate::requester::ManifestRequester;
use crate::serializer::{BlockingSerializer, QueuedSerializer, Serializer};
use crate::stats::{PipelineCounters, PipelineStats};

const MANIFEST_POLL: Duration = Duration::from_millis(10);

/// Everything bound to one running link.
struct Service {
    codec: Arc<FrameCodec>,
    serializer: Arc<dyn Serializer>,
    dispatcher: Arc<Dispatcher>,
    deserializer: Deserializer,
    requester: Option<ManifestRequester>,
}

/// Owns a registry and, while started, one serializer, one deserializer and
/// the manifest requester bound to a device.
///
/// A manager can be started, stopped and started again; every start
/// renegotiates the peer's type numbering from scratch.
///
/// ```no_run
/// use std::sync::Arc;
/// use typewire_frame::Envelope;
/// use typewire_pipeline::{SerializationManager, ServiceConfig};
/// use typewire_transport::UnixDomainSocket;
///
/// let manager = SerializationManager::new(ServiceConfig::default());
/// let device = UnixDomainSocket::connect("/tmp/typewire.sock")?;
/// manager.start_service(Arc::new(device), |env: &Envelope| {
///     println!("received type {}", env.id());
/// })?;
/// manager.wait_for_manifest(std::time::Duration::from_secs(5));
/// manager.stop_service();
/// # Ok::<(), typewire_pipeline::PipelineError>(())
/// ```
pub struct SerializationManager {
    config: ServiceConfig,
    registry: Arc<TypeRegistry>,
    counters: Arc<PipelineCounters>,
    logger: LoggerSlot,
    service: Mutex<Option<Service>>,
}

impl SerializationManager {
    /// Create a manager with a fresh registry.
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_registry(config, Arc::new(TypeRegistry::new()))
    }

    /// Create a manager around an existing registry.
    pub fn with_registry(config: ServiceConfig, registry: Arc<TypeRegistry>) -> Self {
        Self {
            config,
            registry,
            counters: Arc::new(PipelineCounters::default()),
            logger: LoggerSlot::default(),
            service: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Service>> {
        self.service.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Register an application type; see [`TypeRegistry::register`].
    pub fn register<T: Message + Default>(
        &self,
        name: impl Into<String>,
        version: TypeVersion,
    ) -> Result<TypeId> {
        Ok(self.registry.register::<T>(name, version)?)
    }

    /// Bind the pipelines to `device` and begin negotiating.
    ///
    /// A service that is already running is stopped first.
    pub fn start_service<H>(&self, device: Arc<dyn Device>, handler: H) -> Result<()>
    where
        H: InputHandler + 'static,
    {
        self.config.validate()?;
        self.stop_service();

        self.registry.renegotiate();
        if self.config.manifest == ManifestPolicy::Ignore {
            self.registry.accept_identity();
        }

        let device_name = device.name().to_string();
        let codec = Arc::new(FrameCodec::with_device(device, self.config.frame_config()));

        let serializer: Arc<dyn Serializer> = match self.config.serialization {
            Communication::Blocking => Arc::new(BlockingSerializer::new(Arc::clone(&codec))),
            Communication::NonBlocking => Arc::new(QueuedSerializer::spawn(
                Arc::clone(&codec),
                self.config.output_queue_size,
                self.config.base_priority,
                Arc::clone(&self.counters),
            )?),
        };

        let dispatcher = Arc::new(Dispatcher {
            registry: Arc::clone(&self.registry),
            serializer: Arc::clone(&serializer),
            handler: Arc::new(handler),
            logger: self.logger.clone(),
            counters: Arc::clone(&self.counters),
        });

        let spawned = Deserializer::spawn(
            self.config.deserialization,
            Arc::clone(&codec),
            Arc::clone(&dispatcher),
            self.config.input_queue_size,
            self.config.base_priority,
        );
        let deserializer = match spawned {
            Ok(deserializer) => deserializer,
            Err(err) => {
                codec.stop();
                serializer.stop();
                return Err(err);
            }
        };

        let mut service = Service {
            codec,
            serializer,
            dispatcher,
            deserializer,
            requester: None,
        };

        if self.config.manifest == ManifestPolicy::Required {
            let spawned = ManifestRequester::spawn(
                Arc::clone(&self.registry),
                Arc::clone(&service.serializer),
                self.config.manifest_request_interval(),
                Arc::clone(&self.counters),
            );
            match spawned {
                Ok(requester) => service.requester = Some(requester),
                Err(err) => {
                    shutdown(service);
                    return Err(err);
                }
            }
        }

        info!(
            device = %device_name,
            serialization = ?self.config.serialization,
            deserialization = ?self.config.deserialization,
            manifest = ?self.config.manifest,
            priority = self.config.base_priority,
            "service started"
        );
        *self.lock() = Some(service);
        Ok(())
    }

    /// Stop the pipelines and close the device. Safe to call repeatedly.
    pub fn stop_service(&self) {
        let service = self.lock().take();
        if let Some(service) = service {
            shutdown(service);
            info!("service stopped");
        }
    }

    /// Start recording accepted inbound traffic.
    ///
    /// The local manifest is written first so the log can be replayed on
    /// its own. A logger already attached is replaced and closed.
    pub fn start_logger(&self, logger: Logger) -> Result<()> {
        logger.write_manifest(&self.registry.extract_manifest())?;
        if let Some(previous) = self.logger.attach(logger) {
            previous.close();
        }
        debug!("logger attached");
        Ok(())
    }

    /// Detach and close the logger. Returns whether one was attached.
    pub fn stop_logger(&self) -> bool {
        match self.logger.detach() {
            Some(logger) => {
                logger.close();
                debug!("logger detached");
                true
            }
            None => false,
        }
    }

    pub fn is_logging(&self) -> bool {
        self.logger.is_attached()
    }

    /// Send a registered application message.
    pub fn send<M: Message>(&self, message: M) -> Result<()> {
        match self.registry.id_of::<M>() {
            Some(id) => self.send_envelope(Envelope::new(id, Box::new(message))),
            None => self.reject(PipelineError::Unregistered),
        }
    }

    /// Send a boxed message, looking up its id from its concrete type.
    pub fn send_boxed(&self, message: Box<dyn Message>) -> Result<()> {
        match self.registry.id_of_message(message.as_ref()) {
            Some(id) => self.send_envelope(Envelope::new(id, message)),
            None => self.reject(PipelineError::Unregistered),
        }
    }

    /// Send a message under an explicit local id.
    ///
    /// Rejected when no service runs, the link is not functional, or the
    /// peer has not confirmed the type. Rejected messages are dropped.
    pub fn send_envelope(&self, envelope: Envelope) -> Result<()> {
        let (codec, serializer) = {
            let guard = self.lock();
            let Some(service) = guard.as_ref() else {
                return self.reject(PipelineError::NotRunning);
            };
            (Arc::clone(&service.codec), Arc::clone(&service.serializer))
        };
        if !codec.is_functional() {
            return self.reject(PipelineError::NotFunctional);
        }
        let id = envelope.id();
        if !self.registry.is_own_enabled(id) {
            return self.reject(PipelineError::TypeDisabled(id));
        }
        serializer.send(envelope)?;
        PipelineCounters::bump(&self.counters.sent);
        Ok(())
    }

    fn reject(&self, err: PipelineError) -> Result<()> {
        PipelineCounters::bump(&self.counters.rejected_sends);
        debug!(error = %err, "send rejected");
        Err(err)
    }

    /// Flush queued output and resend the local manifest.
    pub fn send_manifest(&self) -> Result<()> {
        let dispatcher = {
            let guard = self.lock();
            let service = guard.as_ref().ok_or(PipelineError::NotRunning)?;
            Arc::clone(&service.dispatcher)
        };
        dispatcher.send_manifest();
        debug!(type_id = MANIFEST_TYPE_ID, "manifest resent");
        Ok(())
    }

    /// Wait until queued output has been written, up to `timeout`.
    ///
    /// [`stop_service`](Self::stop_service) discards queued output, so call
    /// this first when the last messages must reach the peer.
    pub fn flush(&self, timeout: Duration) -> bool {
        let serializer = {
            let guard = self.lock();
            match guard.as_ref() {
                Some(service) => Arc::clone(&service.serializer),
                None => return true,
            }
        };
        serializer.flush(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    /// Whether a service runs over a link that can still carry frames.
    pub fn is_functional(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|service| service.codec.is_functional())
    }

    /// State of the live link; `Stopped` when no service runs.
    pub fn link_state(&self) -> LinkState {
        self.lock()
            .as_ref()
            .map_or(LinkState::Stopped, |service| service.codec.state())
    }

    /// Counters accumulated across every service this manager ran, with the
    /// frame counters of the current link.
    pub fn stats(&self) -> PipelineStats {
        let link = self
            .lock()
            .as_ref()
            .map_or_else(LinkStats::default, |service| service.codec.stats());
        self.counters.snapshot(link)
    }

    /// Block until the peer's manifest has been applied or `timeout`
    /// elapses. Returns whether the manifest arrived.
    pub fn wait_for_manifest(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.registry.is_manifest_received() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(MANIFEST_POLL.min(deadline - now));
        }
    }
}

fn shutdown(mut service: Service) {
    service.codec.stop();
    if let Some(mut requester) = service.requester.take() {
        requester.stop();
    }
    service.serializer.stop();
    service.deserializer.join();
}

impl Drop for SerializationManager {
    fn drop(&mut self) {
        self.stop_service();
        self.stop_logger();
    }
}

impl std::fmt::Debug for SerializationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationManager")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("state", &self.link_state())
            .finish()
    }
}
