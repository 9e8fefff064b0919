use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{info, warn};
use typewire_pipeline::{Logger, SerializationManager};
use typewire_transport::Device;

use crate::cmd::{demo_manager, forwarding_handler, install_ctrlc_handler, ListenArgs, Received};
use crate::exit::{pipeline_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const POLL: Duration = Duration::from_millis(100);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// How a served link ended.
#[derive(Debug, PartialEq, Eq)]
enum Served {
    /// Stop listening altogether (count reached or interrupted).
    Done,
    /// The link failed or the peer went away.
    Disconnected,
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let manager = demo_manager(args.link.service_config()?)?;
    let running = install_ctrlc_handler()?;
    let mut printed = 0usize;

    if args.link.serial {
        let device = args.link.open_serial()?;
        serve(&manager, device, &args, format, &running, &mut printed)?;
        manager.stop_logger();
        return Ok(SUCCESS);
    }

    listen_socket(&manager, &args, format, &running, &mut printed)?;
    manager.stop_logger();
    Ok(SUCCESS)
}

#[cfg(unix)]
fn listen_socket(
    manager: &SerializationManager,
    args: &ListenArgs,
    format: OutputFormat,
    running: &AtomicBool,
    printed: &mut usize,
) -> CliResult<()> {
    use crate::exit::transport_error;
    use typewire_transport::UnixDomainSocket;

    let listener = UnixDomainSocket::bind(&args.link.path)
        .map_err(|err| transport_error("bind failed", err))?;
    info!(path = %listener.path().display(), "listening");

    while running.load(Ordering::SeqCst) {
        let device = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        if serve(manager, Arc::new(device), args, format, running, printed)? == Served::Done {
            break;
        }
        info!("peer disconnected; waiting for the next connection");
    }
    Ok(())
}

#[cfg(not(unix))]
fn listen_socket(
    _manager: &SerializationManager,
    _args: &ListenArgs,
    _format: OutputFormat,
    _running: &AtomicBool,
    _printed: &mut usize,
) -> CliResult<()> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "unix sockets are only supported on unix; use --serial",
    ))
}

fn serve(
    manager: &SerializationManager,
    device: Arc<dyn Device>,
    args: &ListenArgs,
    format: OutputFormat,
    running: &AtomicBool,
    printed: &mut usize,
) -> CliResult<Served> {
    let (tx, rx) = mpsc::channel::<Received>();
    manager
        .start_service(device, forwarding_handler(Arc::clone(manager.registry()), tx))
        .map_err(|err| pipeline_error("service start failed", err))?;

    if let Some(path) = &args.log {
        if !manager.is_logging() {
            let logger = Logger::create(path, manager.config().frame_config())
                .map_err(|err| pipeline_error("log open failed", err))?;
            manager
                .start_logger(logger)
                .map_err(|err| pipeline_error("log start failed", err))?;
        }
    }

    let served = loop {
        if !running.load(Ordering::SeqCst) {
            break Served::Done;
        }
        match rx.recv_timeout(POLL) {
            Ok(received) => {
                print_message(&received.record, format);
                *printed = printed.saturating_add(1);
                if args.echo {
                    if let Some(reply) = received.echo {
                        if let Err(err) = manager.send_boxed(reply) {
                            warn!(error = %err, "echo not sent");
                        }
                    }
                }
                if args.count.is_some_and(|count| *printed >= count) {
                    break Served::Done;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !manager.is_functional() {
                    break Served::Disconnected;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break Served::Disconnected,
        }
    };

    let stats = manager.stats();
    info!(
        dispatched = stats.dispatched,
        header_rejects = stats.link.header_rejects,
        checksum_failures = stats.link.checksum_failures,
        inbound_drops = stats.inbound_drops,
        "link closed"
    );
    if !manager.flush(FLUSH_TIMEOUT) {
        warn!("output not drained before stop");
    }
    manager.stop_service();
    Ok(served)
}
