use serde::Serialize;
use typewire_frame::{Message, WireReader, WireWriter};

/// Lowest command code; not itself a command.
pub const CMD_BEGIN: u32 = 0;
/// One past the highest command code.
pub const CMD_END: u32 = 2;

/// Control commands exchanged between endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Ask the peer to send its manifest.
    ManifestRequest,
}

impl Command {
    pub fn code(self) -> u32 {
        match self {
            Command::ManifestRequest => 1,
        }
    }

    /// Decode a command code; codes outside `(CMD_BEGIN, CMD_END)` are `None`.
    pub fn from_code(code: u32) -> Option<Self> {
        if code <= CMD_BEGIN || code >= CMD_END {
            return None;
        }
        match code {
            1 => Some(Command::ManifestRequest),
            _ => None,
        }
    }
}

/// System command payload: a single `u32` command code.
///
/// An unknown code on the wire leaves the previous command in place, so a
/// freshly decoded message with a bad code carries no command at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemCommand {
    pub command: Option<Command>,
}

impl SystemCommand {
    pub fn new(command: Command) -> Self {
        Self {
            command: Some(command),
        }
    }

    pub fn manifest_request() -> Self {
        Self::new(Command::ManifestRequest)
    }

    pub fn is(&self, command: Command) -> bool {
        self.command == Some(command)
    }
}

impl Message for SystemCommand {
    fn write(&self, out: &mut WireWriter<'_>) -> typewire_frame::Result<()> {
        out.write_u32(self.command.map_or(CMD_BEGIN, Command::code));
        Ok(())
    }

    fn read(&mut self, input: &mut WireReader<'_>) -> typewire_frame::Result<()> {
        let code = input.read_u32()?;
        if let Some(command) = Command::from_code(code) {
            self.command = Some(command);
        }
        Ok(())
    }
}
