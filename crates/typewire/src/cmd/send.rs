use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{debug, warn};
use typewire::messages::{Ping, SensorReading, StringCommand};
use typewire_frame::Message;
use typewire_pipeline::{ManifestPolicy, SerializationManager};
use typewire_transport::Device;

use crate::cmd::{demo_manager, forwarding_handler, parse_duration, Received, SendArgs};
use crate::exit::{pipeline_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let negotiate_timeout = parse_duration(&args.timeout)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let message = resolve_message(&args)?;

    let manager = demo_manager(args.link.service_config()?)?;
    let device = open_device(&args)?;
    let (tx, rx) = mpsc::channel::<Received>();
    manager
        .start_service(device, forwarding_handler(Arc::clone(manager.registry()), tx))
        .map_err(|err| pipeline_error("service start failed", err))?;

    let result = exchange(&manager, message, &rx, &args, negotiate_timeout, wait_timeout, format);
    if !manager.flush(FLUSH_TIMEOUT) {
        warn!("output not drained before stop");
    }
    manager.stop_service();
    result.map(|()| SUCCESS)
}

fn exchange(
    manager: &SerializationManager,
    message: Box<dyn Message>,
    rx: &mpsc::Receiver<Received>,
    args: &SendArgs,
    negotiate_timeout: Duration,
    wait_timeout: Duration,
    format: OutputFormat,
) -> CliResult<()> {
    if !manager.wait_for_manifest(negotiate_timeout) {
        return Err(CliError::new(
            TIMEOUT,
            format!("no manifest from peer within {negotiate_timeout:?}"),
        ));
    }
    if manager.config().manifest == ManifestPolicy::Required {
        // the peer cannot decode our frames before it has our manifest
        manager
            .send_manifest()
            .map_err(|err| pipeline_error("manifest send failed", err))?;
    }

    manager
        .send_boxed(message)
        .map_err(|err| pipeline_error("send failed", err))?;
    debug!("message sent");

    if args.wait {
        let received = rx.recv_timeout(wait_timeout).map_err(|_| {
            CliError::new(TIMEOUT, format!("no reply within {wait_timeout:?}"))
        })?;
        print_message(&received.record, format);
    }
    Ok(())
}

fn resolve_message(args: &SendArgs) -> CliResult<Box<dyn Message>> {
    if let Some(text) = &args.text {
        return Ok(Box::new(StringCommand::new(text.as_str())));
    }
    if args.ping {
        return Ok(Box::new(Ping::now()));
    }
    if let Some(axes) = &args.sensor {
        return match axes.as_slice() {
            [x, y, z] => Ok(Box::new(SensorReading::new(*x, *y, *z))),
            _ => Err(CliError::new(USAGE, "--sensor takes exactly three values")),
        };
    }
    Err(CliError::new(
        USAGE,
        "nothing to send: pass --text, --ping or --sensor",
    ))
}

#[cfg(unix)]
fn open_device(args: &SendArgs) -> CliResult<Arc<dyn Device>> {
    if args.link.serial {
        return args.link.open_serial();
    }
    let device = typewire_transport::UnixDomainSocket::connect(&args.link.path)
        .map_err(|err| crate::exit::transport_error("connect failed", err))?;
    Ok(Arc::new(device))
}

#[cfg(not(unix))]
fn open_device(args: &SendArgs) -> CliResult<Arc<dyn Device>> {
    args.link.open_serial()
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use typewire_frame::AsAny;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SendArgs,
    }

    fn parse(argv: &[&str]) -> SendArgs {
        let mut full = vec!["send"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).unwrap().args
    }

    #[test]
    fn resolves_each_payload_kind() {
        let msg = resolve_message(&parse(&["/tmp/s.sock", "--text", "go"])).unwrap();
        assert_eq!(
            (*msg).as_any().downcast_ref::<StringCommand>(),
            Some(&StringCommand::new("go"))
        );

        let msg = resolve_message(&parse(&["/tmp/s.sock", "--sensor", "1,-2,3"])).unwrap();
        assert_eq!(
            (*msg).as_any().downcast_ref::<SensorReading>(),
            Some(&SensorReading::new(1, -2, 3))
        );

        let msg = resolve_message(&parse(&["/tmp/s.sock", "--ping"])).unwrap();
        assert!((*msg).as_any().is::<Ping>());
    }

    #[test]
    fn empty_send_is_a_usage_error() {
        let err = resolve_message(&parse(&["/tmp/s.sock"])).unwrap_err();
        assert_eq!(err.code, USAGE);
    }
}
