//! Error taxonomy and the cross-boundary error envelope.
//!
//! Errors never cross the link as Rust values. A handler failure is turned
//! into a plain [`ErrorEnvelope`] by [`wrap_error`], sent as the reply
//! payload, and rebuilt into a [`RemoteError`] by [`unwrap_error`] on the
//! calling side.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::error;

/// Boxed error type accepted from handlers and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Wire field that marks an error envelope.
pub const ERROR_MARKER: &str = "__ipcxError";

/// Stable error codes. The string form is what travels on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "IPCX_E1001")]
    InvalidPayload,
    #[serde(rename = "IPCX_E1002")]
    InvalidArgs,
    #[serde(rename = "IPCX_E1003")]
    InvalidFns,
    #[serde(rename = "IPCX_E1004")]
    InvalidDescriptor,
    #[serde(rename = "IPCX_E2001")]
    SerializeFailed,
    #[serde(rename = "IPCX_E2002")]
    CircularReference,
    #[serde(rename = "IPCX_E2003")]
    UnsupportedType,
    #[serde(rename = "IPCX_E3001")]
    CallbackFailed,
    #[serde(rename = "IPCX_E3002")]
    SenderMissing,
    #[serde(rename = "IPCX_E3003")]
    HydrationFailed,
    #[serde(rename = "IPCX_E3004")]
    ListenerError,
    #[serde(rename = "IPCX_E9999")]
    Unknown,
}

/// Coarse grouping of [`ErrorCode`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Serialization,
    Runtime,
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 12] = [
        Self::InvalidPayload,
        Self::InvalidArgs,
        Self::InvalidFns,
        Self::InvalidDescriptor,
        Self::SerializeFailed,
        Self::CircularReference,
        Self::UnsupportedType,
        Self::CallbackFailed,
        Self::SenderMissing,
        Self::HydrationFailed,
        Self::ListenerError,
        Self::Unknown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPayload => "IPCX_E1001",
            Self::InvalidArgs => "IPCX_E1002",
            Self::InvalidFns => "IPCX_E1003",
            Self::InvalidDescriptor => "IPCX_E1004",
            Self::SerializeFailed => "IPCX_E2001",
            Self::CircularReference => "IPCX_E2002",
            Self::UnsupportedType => "IPCX_E2003",
            Self::CallbackFailed => "IPCX_E3001",
            Self::SenderMissing => "IPCX_E3002",
            Self::HydrationFailed => "IPCX_E3003",
            Self::ListenerError => "IPCX_E3004",
            Self::Unknown => "IPCX_E9999",
        }
    }

    /// Look up a code by its wire string.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            Self::InvalidPayload | Self::InvalidArgs | Self::InvalidFns | Self::InvalidDescriptor => {
                ErrorCategory::Validation
            }
            Self::SerializeFailed | Self::CircularReference | Self::UnsupportedType => {
                ErrorCategory::Serialization
            }
            Self::CallbackFailed
            | Self::SenderMissing
            | Self::HydrationFailed
            | Self::ListenerError => ErrorCategory::Runtime,
            Self::Unknown => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised by the envelope layer itself.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct IpcxError {
    pub code: ErrorCode,
    pub message: String,
    /// Structured diagnostics (paths, channel names, previews).
    pub context: Map<String, Value>,
}

impl IpcxError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Map::new(),
        }
    }

    /// Attach a diagnostic field.
    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Wrap a callback failure. Callers log these; they are never propagated.
    pub fn callback_failed(callback_index: &str, cause: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(
            ErrorCode::CallbackFailed,
            format!("callback execution failed: {callback_index}"),
        )
        .with_context("callback", callback_index)
        .with_context("cause", cause.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IpcxError>;

/// Plain-data stand-in for an error, as sent across the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(rename = "__ipcxError")]
    pub marker: bool,
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "code_from_string_or_number"
    )]
    pub code: Option<String>,
}

impl ErrorEnvelope {
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(ERROR_MARKER.to_string(), Value::Bool(true));
        object.insert("name".to_string(), Value::String(self.name.clone()));
        object.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(stack) = &self.stack {
            object.insert("stack".to_string(), Value::String(stack.clone()));
        }
        if let Some(code) = &self.code {
            object.insert("code".to_string(), Value::String(code.clone()));
        }
        Value::Object(object)
    }
}

fn code_from_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(code)) => Some(code),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    })
}

/// An error reconstructed from an [`ErrorEnvelope`] on the receiving side.
///
/// Handlers can also return one directly to control the name and code the
/// caller observes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub code: Option<String>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            stack: None,
            code: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// The code as an ipcx taxonomy entry, if it is one.
    pub fn ipcx_code(&self) -> Option<ErrorCode> {
        self.code.as_deref().and_then(ErrorCode::from_code)
    }
}

impl From<ErrorEnvelope> for RemoteError {
    fn from(envelope: ErrorEnvelope) -> Self {
        Self {
            name: envelope.name,
            message: envelope.message,
            stack: envelope.stack,
            code: envelope.code,
        }
    }
}

/// Convert any error into a plain [`ErrorEnvelope`].
///
/// `stack` carries the rendered source chain; `code` comes from the ipcx
/// taxonomy or from a code attached to a [`RemoteError`].
pub fn wrap_error(err: &(dyn std::error::Error + 'static)) -> ErrorEnvelope {
    if let Some(remote) = err.downcast_ref::<RemoteError>() {
        return ErrorEnvelope {
            marker: true,
            name: remote.name.clone(),
            message: remote.message.clone(),
            stack: remote.stack.clone().or_else(|| render_chain(err)),
            code: remote.code.clone(),
        };
    }

    let (name, code) = match err.downcast_ref::<IpcxError>() {
        Some(ipcx) => ("IpcxError", Some(ipcx.code.as_str().to_string())),
        None => ("Error", None),
    };

    ErrorEnvelope {
        marker: true,
        name: name.to_string(),
        message: err.to_string(),
        stack: render_chain(err),
        code,
    }
}

fn render_chain(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("caused by: {cause}"));
        source = cause.source();
    }
    Some(lines.join("\n"))
}

/// Returns true if `value` carries the error envelope marker.
pub fn is_error_envelope(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|object| object.get(ERROR_MARKER))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Turn an error envelope back into an error; any other value passes through.
pub fn unwrap_error(value: Value) -> std::result::Result<Value, RemoteError> {
    if !is_error_envelope(&value) {
        return Ok(value);
    }
    match serde_json::from_value::<ErrorEnvelope>(value) {
        Ok(envelope) => Err(envelope.into()),
        Err(err) => Err(RemoteError::new(format!("malformed error envelope: {err}"))
            .with_code(ErrorCode::InvalidPayload.as_str())),
    }
}

/// Run a fallible listener, logging instead of propagating its failure.
///
/// Returns false if the closure failed.
pub fn safe_call<F, E>(f: F, context: &str) -> bool
where
    F: FnOnce() -> std::result::Result<(), E>,
    E: fmt::Display,
{
    match f() {
        Ok(()) => true,
        Err(err) => {
            error!(context, code = %ErrorCode::ListenerError, error = %err, "safe call failed");
            false
        }
    }
}
