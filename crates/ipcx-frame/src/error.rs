/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header contains an invalid magic number.
    #[error("invalid frame magic (expected 0x4958 \"IX\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The frame header names a message kind this version does not know.
    #[error("unknown message kind {0}")]
    UnknownKind(u16),

    /// The frame body is not a valid message of its declared kind.
    #[error("malformed {kind} body: {source}")]
    Body {
        kind: &'static str,
        source: serde_json::Error,
    },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
