/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// An I/O error occurred while reading or writing the device.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device reached end of stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// The codec was stopped (no device bound).
    #[error("link stopped")]
    Stopped,

    /// The codec is in the error state and refuses further traffic.
    #[error("link not functional")]
    NotFunctional,

    /// A checksummed field or payload did not match its checksum.
    #[error("checksum mismatch (expected {expected:#04x}, computed {computed:#04x})")]
    ChecksumMismatch { expected: u8, computed: u8 },

    /// A decoded length exceeds the configured bound.
    #[error("length {len} exceeds limit {max}")]
    LengthTooLarge { len: usize, max: usize },

    /// A decoded string is not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
}

impl FrameError {
    /// Whether the error only affects the current frame.
    ///
    /// Recoverable errors discard the frame being decoded and send the codec
    /// back to scanning for a sync marker. Everything else is fatal to the
    /// link until it is restarted.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FrameError::ChecksumMismatch { .. }
                | FrameError::LengthTooLarge { .. }
                | FrameError::InvalidUtf8
        )
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
