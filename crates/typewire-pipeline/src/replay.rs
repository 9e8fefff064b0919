//! Offline dispatch over a recorded stream.

use std::path::Path;
use std::sync::Arc;

use tracing::info;
use typewire_frame::{FrameCodec, FrameConfig, FrameError};
use typewire_registry::TypeRegistry;
use typewire_transport::{Device, FileMode, StreamDevice};

use crate::deserializer::{read_loop, Dispatcher};
use crate::error::Result;
use crate::handler::InputHandler;
use crate::logger::LoggerSlot;
use crate::serializer::NullSerializer;
use crate::stats::{PipelineCounters, PipelineStats};

/// Run the live dispatch logic over a recorded stream until it ends.
///
/// The registry is renegotiated first, so only types confirmed by the
/// manifest at the head of the recording reach `handler`. Manifest requests
/// in the recording are answered into a sink that discards them.
pub fn replay<H>(
    registry: &Arc<TypeRegistry>,
    device: Arc<dyn Device>,
    handler: H,
    config: FrameConfig,
) -> Result<PipelineStats>
where
    H: InputHandler + 'static,
{
    registry.renegotiate();
    let codec = FrameCodec::with_device(device, config);
    let counters = Arc::new(PipelineCounters::default());
    let dispatcher = Dispatcher {
        registry: Arc::clone(registry),
        serializer: Arc::new(NullSerializer),
        handler: Arc::new(handler),
        logger: LoggerSlot::default(),
        counters: Arc::clone(&counters),
    };

    let ended = read_loop(&codec, registry, |envelope| dispatcher.dispatch(envelope));
    let stats = counters.snapshot(codec.stats());
    codec.stop();
    match ended {
        FrameError::ConnectionClosed | FrameError::Stopped => {
            info!(
                frames = stats.link.frames_decoded,
                dispatched = stats.dispatched,
                "replay finished"
            );
            Ok(stats)
        }
        err => Err(err.into()),
    }
}

/// Replay a log file written by [`Logger::create`](crate::Logger::create).
pub fn replay_file<H>(
    registry: &Arc<TypeRegistry>,
    path: impl AsRef<Path>,
    handler: H,
    config: FrameConfig,
) -> Result<PipelineStats>
where
    H: InputHandler + 'static,
{
    let device = StreamDevice::open_file(path.as_ref(), FileMode::Read)?;
    replay(registry, Arc::new(device), handler, config)
}
