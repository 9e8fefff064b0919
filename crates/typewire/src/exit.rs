use std::fmt;
use std::io;

use typewire_frame::FrameError;
use typewire_pipeline::PipelineError;
use typewire_registry::RegistryError;
use typewire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. }
        | TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::UnsupportedBaud(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ChecksumMismatch { .. }
        | FrameError::LengthTooLarge { .. }
        | FrameError::InvalidUtf8 => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed | FrameError::NotFunctional | FrameError::Stopped => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
    }
}

pub fn registry_error(context: &str, err: RegistryError) -> CliError {
    CliError::new(INTERNAL, format!("{context}: {err}"))
}

pub fn pipeline_error(context: &str, err: PipelineError) -> CliError {
    match err {
        PipelineError::Transport(err) => transport_error(context, err),
        PipelineError::Frame(err) => frame_error(context, err),
        PipelineError::Registry(err) => registry_error(context, err),
        PipelineError::Config(_) | PipelineError::Json(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        PipelineError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PipelineError::NotFunctional | PipelineError::NotRunning => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        PipelineError::TypeDisabled(_)
        | PipelineError::Unregistered
        | PipelineError::QueueFull { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        PipelineError::Spawn { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn pipeline_errors_map_to_exit_codes() {
        let code = |err| pipeline_error("ctx", err).code;
        assert_eq!(code(PipelineError::Timeout(Duration::from_secs(1))), TIMEOUT);
        assert_eq!(code(PipelineError::Config("bad".into())), USAGE);
        assert_eq!(code(PipelineError::TypeDisabled(3)), FAILURE);
        assert_eq!(
            code(PipelineError::Frame(FrameError::ConnectionClosed)),
            TRANSPORT_ERROR
        );
    }

    #[test]
    fn missing_socket_is_a_transport_error() {
        let err = transport_error(
            "connect failed",
            TransportError::Connect {
                path: "/tmp/none.sock".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed: "));
    }
}
