use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ErrorCode, IpcxError, Result};
use crate::path::Segment;

/// Wire field that tags a value as an invoke envelope.
pub const ENVELOPE_MARKER: &str = "__ipcx";

/// Envelope format version written into [`ENVELOPE_MARKER`].
pub const ENVELOPE_VERSION: u64 = 1;

/// Locates one lifted function and names its private reply channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Diagnostic name: the callback label, the last path segment, or `fn`.
    pub label: String,
    /// Diagnostic path, e.g. `args[0].onProgress`.
    pub index: String,
    /// Channel the callee forwards invocations on.
    pub channel: String,
    /// Position below the envelope's `args`.
    #[serde(default)]
    pub segments: Vec<Segment>,
}

/// Plain-data stand-in for an argument list that contained functions.
///
/// `args` holds the arguments with every function replaced by `null`; `fns`
/// holds one descriptor per replaced function.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvokeEnvelope {
    pub args: Vec<Value>,
    pub fns: Vec<FunctionDescriptor>,
}

impl InvokeEnvelope {
    pub fn new(args: Vec<Value>, fns: Vec<FunctionDescriptor>) -> Self {
        Self { args, fns }
    }

    /// The tagged wire form.
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|err| {
            IpcxError::new(
                ErrorCode::SerializeFailed,
                format!("failed to encode envelope: {err}"),
            )
        })
    }
}

impl Serialize for InvokeEnvelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("InvokeEnvelope", 3)?;
        state.serialize_field(ENVELOPE_MARKER, &ENVELOPE_VERSION)?;
        state.serialize_field("args", &self.args)?;
        state.serialize_field("fns", &self.fns)?;
        state.end()
    }
}
