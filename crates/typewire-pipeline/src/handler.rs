use typewire_frame::Envelope;

/// Receives every accepted inbound application message.
///
/// Called once per message, in arrival order, from a pipeline thread.
/// Control traffic (manifests, system commands) never reaches the handler.
pub trait InputHandler: Send + Sync {
    fn process(&self, envelope: &Envelope);
}

impl<F> InputHandler for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn process(&self, envelope: &Envelope) {
        self(envelope)
    }
}

/// Handler that ignores every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl InputHandler for DiscardHandler {
    fn process(&self, _envelope: &Envelope) {}
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use typewire_registry::SystemCommand;

    use super::*;

    #[test]
    fn closures_are_handlers() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: Arc<dyn InputHandler> = Arc::new(move |env: &Envelope| {
            assert_eq!(env.id(), 5);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let env = Envelope::new(5, Box::new(SystemCommand::default()));
        handler.process(&env);
        handler.process(&env);
        DiscardHandler.process(&env);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
