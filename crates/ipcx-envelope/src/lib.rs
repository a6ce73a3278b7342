//! Envelope codec for passing live callbacks across a message boundary.
//!
//! Only plain JSON values can cross the link between two endpoints. This
//! crate turns an argument tree that may contain functions into an
//! [`InvokeEnvelope`]: the functions are *lifted* out, replaced by `null`,
//! and described by [`FunctionDescriptor`]s naming a private reply channel.
//! The receiving side validates the envelope and splices callable proxies
//! back in at the recorded paths.
//!
//! # Crate Structure
//!
//! - [`value`] — the in-process argument tree ([`Arg`], [`Callback`])
//! - [`path`] — get/set-by-path over argument trees
//! - [`serialize`] — lifting, dedup and cycle detection
//! - [`validate`] — inbound envelope detection and normalization
//! - [`error`] — error taxonomy and the wire error envelope
//! - [`debug`] — `IPCX_DEBUG` verbosity and payload previews

pub mod debug;
pub mod error;
pub mod path;
pub mod serialize;
pub mod types;
pub mod validate;
pub mod value;

pub use debug::{truncate_payload, DebugLevel, PAYLOAD_PREVIEW_LIMIT};
pub use error::{
    is_error_envelope, safe_call, unwrap_error, wrap_error, BoxError, ErrorCategory, ErrorCode,
    ErrorEnvelope, IpcxError, RemoteError, Result, ERROR_MARKER,
};
pub use path::{format_path, get_by_path, parse_path, set_by_path, Segment};
pub use serialize::{
    count_functions, serialize_args, serialize_args_with, to_plain, to_plain_args,
    SerializeOptions, Serialized, DEFAULT_MAX_DEPTH,
};
pub use types::{FunctionDescriptor, InvokeEnvelope, ENVELOPE_MARKER, ENVELOPE_VERSION};
pub use validate::{
    is_invoke_envelope, normalize_descriptor, normalize_envelope, prepare_inbound_args,
};
pub use value::{Arg, ArgList, ArgMap, Callback, Opaque};
