use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};
use typewire_frame::Envelope;
use typewire_registry::{SystemCommand, TypeRegistry, SYSTEM_COMMAND_TYPE_ID};

use crate::error::{PipelineError, Result};
use crate::serializer::Serializer;
use crate::stats::PipelineCounters;

/// Background task that keeps asking the peer for its manifest until one
/// arrives.
///
/// Requests repeat at a fixed interval so negotiation still completes when
/// an early request is lost or sent before the peer was listening.
pub struct ManifestRequester {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ManifestRequester {
    pub(crate) fn spawn(
        registry: Arc<TypeRegistry>,
        serializer: Arc<dyn Serializer>,
        interval: Duration,
        counters: Arc<PipelineCounters>,
    ) -> Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("typewire-negotiate".to_string())
            .spawn(move || loop {
                if registry.is_manifest_received() {
                    debug!("manifest received; requester finished");
                    return;
                }
                let request = Envelope::new(
                    SYSTEM_COMMAND_TYPE_ID,
                    Box::new(SystemCommand::manifest_request()),
                );
                match serializer.send(request) {
                    Ok(()) => {
                        PipelineCounters::bump(&counters.manifest_requests_sent);
                        trace!("manifest request sent");
                    }
                    Err(err) => trace!(error = %err, "manifest request not sent"),
                }
                match cancelled.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("requester cancelled");
                        return;
                    }
                }
            })
            .map_err(|source| PipelineError::Spawn {
                name: "typewire-negotiate",
                source,
            })?;
        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Cancel the task and wait for it.
    pub fn stop(&mut self) {
        drop(self.cancel.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("manifest requester panicked");
            }
        }
    }
}

impl Drop for ManifestRequester {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use typewire_registry::Manifest;

    use super::*;
    use crate::config::Communication;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<u8>>,
    }

    impl Serializer for Recording {
        fn send(&self, envelope: Envelope) -> Result<()> {
            self.sent.lock().unwrap().push(envelope.id());
            Ok(())
        }

        fn reset(&self) {}

        fn stop(&self) {}

        fn mode(&self) -> Option<Communication> {
            None
        }
    }

    #[test]
    fn repeats_until_manifest_received() {
        let registry = Arc::new(TypeRegistry::new());
        let recording = Arc::new(Recording::default());
        let counters = Arc::new(PipelineCounters::default());
        let mut requester = ManifestRequester::spawn(
            Arc::clone(&registry),
            Arc::clone(&recording) as Arc<dyn Serializer>,
            Duration::from_millis(10),
            Arc::clone(&counters),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while recording.sent.lock().unwrap().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        registry.apply_manifest(&TypeRegistry::new().extract_manifest());

        while !requester.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(requester.is_finished());
        requester.stop();

        let sent = recording.sent.lock().unwrap();
        assert!(sent.len() >= 3);
        assert!(sent.iter().all(|id| *id == SYSTEM_COMMAND_TYPE_ID));
        assert_eq!(
            counters.snapshot(Default::default()).manifest_requests_sent,
            sent.len() as u64
        );
    }

    #[test]
    fn stop_cancels_a_waiting_requester() {
        let registry = Arc::new(TypeRegistry::new());
        let mut requester = ManifestRequester::spawn(
            registry,
            Arc::new(Recording::default()),
            Duration::from_secs(3600),
            Arc::new(PipelineCounters::default()),
        )
        .unwrap();

        let started = Instant::now();
        requester.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(requester.is_finished());
    }

    #[test]
    fn nothing_sent_when_already_negotiated() {
        let registry = Arc::new(TypeRegistry::new());
        registry.apply_manifest(&Manifest::new(
            TypeRegistry::new().extract_manifest().entries,
        ));
        let recording = Arc::new(Recording::default());
        let mut requester = ManifestRequester::spawn(
            registry,
            Arc::clone(&recording) as Arc<dyn Serializer>,
            Duration::from_millis(10),
            Arc::new(PipelineCounters::default()),
        )
        .unwrap();
        requester.stop();
        assert!(recording.sent.lock().unwrap().is_empty());
    }
}
