use ipcx_envelope::{IpcxError, RemoteError};

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] ipcx_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] ipcx_frame::FrameError),

    /// Envelope encoding or validation failed locally.
    #[error("{} {}", .0.code, .0.message)]
    Envelope(#[from] IpcxError),

    /// The remote handler failed. Carries its name, message and code.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The link closed before the operation completed.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PeerError {
    /// The error code carried by an envelope or remote error, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Envelope(err) => Some(err.code.as_str()),
            Self::Remote(err) => err.code.as_deref(),
            _ => None,
        }
    }

    /// The reconstructed remote error, when the handler failed.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
