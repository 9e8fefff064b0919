use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use typewire::messages::{register_demo_types, Ping, StringCommand};
use typewire_frame::{Endianness, Envelope, Message};
use typewire_pipeline::{Communication, ManifestPolicy, SerializationManager, ServiceConfig};
use typewire_registry::TypeRegistry;
use typewire_transport::Device;

use crate::exit::{pipeline_error, registry_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::{MessageRecord, OutputFormat};

pub mod listen;
pub mod manifest;
pub mod replay;
pub mod send;
pub mod version;

/// Default serial line speed.
pub const DEFAULT_BAUD: u32 = 115_200;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept a link and print received messages.
    Listen(ListenArgs),
    /// Negotiate with a peer and send one message.
    Send(SendArgs),
    /// Print the messages stored in a log file.
    Replay(ReplayArgs),
    /// Print the local type manifest.
    Manifest(ManifestArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Replay(args) => replay::run(args, format),
        Command::Manifest(args) => manifest::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum EndiannessArg {
    Native,
    Swap,
    Ignore,
    Little,
    Big,
}

impl From<EndiannessArg> for Endianness {
    fn from(arg: EndiannessArg) -> Self {
        match arg {
            EndiannessArg::Native => Endianness::Native,
            EndiannessArg::Swap => Endianness::Swap,
            EndiannessArg::Ignore => Endianness::Ignore,
            EndiannessArg::Little => Endianness::Little,
            EndiannessArg::Big => Endianness::Big,
        }
    }
}

/// Device and service options shared by `listen` and `send`.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Unix socket path, or a serial device when --serial is set.
    pub path: PathBuf,
    /// Open PATH as a serial line instead of a Unix socket.
    #[arg(long)]
    pub serial: bool,
    /// Serial line speed.
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Service configuration file (JSON). Flags below override it.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Do the frame I/O on the calling threads, without queues.
    #[arg(long)]
    pub blocking: bool,
    /// Skip manifest negotiation; both ends must register the same types in
    /// the same order.
    #[arg(long)]
    pub no_manifest: bool,
    /// Byte order of multi-byte fields.
    #[arg(long, value_enum)]
    pub endianness: Option<EndiannessArg>,
}

impl LinkArgs {
    pub fn service_config(&self) -> CliResult<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_json_file(path)
                .map_err(|err| pipeline_error("config load failed", err))?,
            None => ServiceConfig::default(),
        };
        if self.blocking {
            config.serialization = Communication::Blocking;
            config.deserialization = Communication::Blocking;
        }
        if self.no_manifest {
            config.manifest = ManifestPolicy::Ignore;
        }
        if let Some(endianness) = self.endianness {
            config.endianness = endianness.into();
        }
        config
            .validate()
            .map_err(|err| pipeline_error("invalid configuration", err))?;
        Ok(config)
    }

    #[cfg(unix)]
    pub fn open_serial(&self) -> CliResult<Arc<dyn Device>> {
        let device = typewire_transport::serial::open(&self.path, self.baud)
            .map_err(|err| crate::exit::transport_error("serial open failed", err))?;
        Ok(Arc::new(device))
    }

    #[cfg(not(unix))]
    pub fn open_serial(&self) -> CliResult<Arc<dyn Device>> {
        Err(CliError::new(USAGE, "serial lines are only supported on unix"))
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Record accepted messages to FILE (replayable).
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,
    /// Send every received ping and string command back to the peer.
    #[arg(long)]
    pub echo: bool,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Send a string command.
    #[arg(long, conflicts_with_all = ["ping", "sensor"])]
    pub text: Option<String>,
    /// Send a ping stamped with the current time.
    #[arg(long, conflicts_with_all = ["text", "sensor"])]
    pub ping: bool,
    /// Send a sensor reading.
    #[arg(
        long,
        value_name = "X,Y,Z",
        value_delimiter = ',',
        allow_hyphen_values = true,
        conflicts_with_all = ["text", "ping"]
    )]
    pub sensor: Option<Vec<i16>>,
    /// Maximum time to wait for the peer's manifest (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Wait for one message back and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set.
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Log file written by `listen --log`.
    pub file: PathBuf,
    /// Byte order the log was written with.
    #[arg(long, value_enum)]
    pub endianness: Option<EndiannessArg>,
    /// Print pipeline counters after the messages.
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug, Default)]
pub struct ManifestArgs {}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// A manager with every demo type registered.
pub fn demo_manager(config: ServiceConfig) -> CliResult<SerializationManager> {
    let manager = SerializationManager::new(config);
    register_demo_types(manager.registry())
        .map_err(|err| registry_error("type registration failed", err))?;
    Ok(manager)
}

/// One inbound message handed from the dispatch thread to the command.
pub struct Received {
    pub record: MessageRecord,
    /// Copy of the message to send back, for types that can be echoed.
    pub echo: Option<Box<dyn Message>>,
}

/// Input handler that describes each message and forwards it to `tx`.
pub fn forwarding_handler(
    registry: Arc<TypeRegistry>,
    tx: mpsc::Sender<Received>,
) -> impl Fn(&Envelope) + Send + Sync + 'static {
    move |envelope: &Envelope| {
        let echo: Option<Box<dyn Message>> = if let Some(ping) = envelope.downcast_ref::<Ping>() {
            Some(Box::new(*ping))
        } else {
            envelope
                .downcast_ref::<StringCommand>()
                .map(|cmd| Box::new(cmd.clone()) as Box<dyn Message>)
        };
        let received = Received {
            record: MessageRecord::describe(envelope, &registry),
            echo,
        };
        if tx.send(received).is_err() {
            tracing::debug!(type_id = envelope.id(), "receiver gone; message not forwarded");
        }
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    if millis {
        Ok(Duration::from_millis(value))
    } else {
        Ok(Duration::from_secs(value))
    }
}

/// Flag cleared by Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration(" ").is_err());
    }

    fn link(path: &str) -> LinkArgs {
        LinkArgs {
            path: path.into(),
            serial: false,
            baud: DEFAULT_BAUD,
            config: None,
            blocking: false,
            no_manifest: false,
            endianness: None,
        }
    }

    #[test]
    fn flags_override_defaults() {
        let mut args = link("/tmp/x.sock");
        args.blocking = true;
        args.no_manifest = true;
        args.endianness = Some(EndiannessArg::Big);
        let config = args.service_config().unwrap();
        assert_eq!(config.serialization, Communication::Blocking);
        assert_eq!(config.deserialization, Communication::Blocking);
        assert_eq!(config.manifest, ManifestPolicy::Ignore);
        assert_eq!(config.endianness, Endianness::Big);
    }

    #[test]
    fn config_file_is_loaded_then_overridden() {
        let path = std::env::temp_dir().join(format!("typewire-cli-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"input_queue_size": 32, "manifest": "ignore"}"#).unwrap();
        let mut args = link("/tmp/x.sock");
        args.config = Some(path.clone());
        args.blocking = true;
        let config = args.service_config().unwrap();
        assert_eq!(config.input_queue_size, 32);
        assert_eq!(config.manifest, ManifestPolicy::Ignore);
        assert_eq!(config.serialization, Communication::Blocking);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_config_file_is_a_usage_error() {
        let mut args = link("/tmp/x.sock");
        args.config = Some("/nonexistent/typewire.json".into());
        assert_eq!(args.service_config().unwrap_err().code, USAGE);
    }
}
