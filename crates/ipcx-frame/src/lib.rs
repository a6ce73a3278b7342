//! Length-prefixed message framing for ipcx links.
//!
//! Every message travelling between two endpoints is framed with:
//! - A 2-byte magic number ("IX") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian message kind
//!
//! The payload is the JSON body of a [`Message`]. [`FrameCodec`] plugs the
//! format into `tokio_util::codec::Framed`.

pub mod codec;
pub mod error;
pub mod kind;
pub mod message;

pub use codec::{
    decode_frame, encode_frame, Frame, FrameCodec, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use kind::{kind_name, EVENT, INVOKE, REPLY};
pub use message::{Event, Invoke, Message, Reply};
