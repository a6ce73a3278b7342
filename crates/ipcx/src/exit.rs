use std::fmt;
use std::io;

use ipcx_envelope::{ErrorCategory, IpcxError};
use ipcx_frame::FrameError;
use ipcx_peer::PeerError;
use ipcx_transport::TransportError;

// Exit code constants aligned with rsfulmen/DDR-0002 semantics.
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
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::Body { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn envelope_error(context: &str, err: &IpcxError) -> CliError {
    let code = match err.code.category() {
        ErrorCategory::Validation | ErrorCategory::Serialization => DATA_INVALID,
        ErrorCategory::Runtime => FAILURE,
        ErrorCategory::Unknown => INTERNAL,
    };
    CliError::new(code, format!("{context}: {} {}", err.code, err.message))
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Envelope(err) => envelope_error(context, &err),
        PeerError::Json(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        PeerError::Remote(_) | PeerError::Disconnected(_) => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use ipcx_envelope::{ErrorCode, RemoteError};

    use super::*;

    #[test]
    fn envelope_errors_map_by_category() {
        let err = IpcxError::new(ErrorCode::CircularReference, "cycle");
        assert_eq!(envelope_error("invoke", &err).code, DATA_INVALID);
        let err = IpcxError::new(ErrorCode::CallbackFailed, "cb");
        assert_eq!(envelope_error("invoke", &err).code, FAILURE);
    }

    #[test]
    fn remote_errors_keep_their_message() {
        let err = peer_error(
            "invoke failed",
            PeerError::Remote(RemoteError::new("boom").with_name("DemoError")),
        );
        assert_eq!(err.code, FAILURE);
        assert_eq!(err.message, "invoke failed: DemoError: boom");
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
    }
}
