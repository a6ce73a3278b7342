//! Wire messages exchanged between two endpoints.
//!
//! The frame header carries the kind; the body is the JSON form of the
//! matching struct below.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Frame;
use crate::error::{FrameError, Result};
use crate::kind::{kind_name, EVENT, INVOKE, REPLY};

/// A request that expects exactly one [`Reply`] with the same `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoke {
    pub id: u64,
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
}

/// The outcome of an [`Invoke`]. Errors travel as error envelopes inside `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub payload: Value,
}

/// A one-way message on a named channel with positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub channel: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Invoke(Invoke),
    Reply(Reply),
    Event(Event),
}

impl Message {
    pub fn invoke(id: u64, channel: impl Into<String>, payload: Value) -> Self {
        Self::Invoke(Invoke {
            id,
            channel: channel.into(),
            payload,
        })
    }

    pub fn reply(id: u64, payload: Value) -> Self {
        Self::Reply(Reply { id, payload })
    }

    pub fn event(channel: impl Into<String>, args: Vec<Value>) -> Self {
        Self::Event(Event {
            channel: channel.into(),
            args,
        })
    }

    /// The frame kind this message is sent as.
    pub fn kind(&self) -> u16 {
        match self {
            Self::Invoke(_) => INVOKE,
            Self::Reply(_) => REPLY,
            Self::Event(_) => EVENT,
        }
    }

    /// Channel name for invokes and events; replies are routed by id only.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Self::Invoke(invoke) => Some(&invoke.channel),
            Self::Event(event) => Some(&event.channel),
            Self::Reply(_) => None,
        }
    }

    /// Encode the body as JSON and wrap it in a frame.
    pub fn to_frame(&self) -> Result<Frame> {
        let kind = self.kind();
        let body = match self {
            Self::Invoke(invoke) => serde_json::to_vec(invoke),
            Self::Reply(reply) => serde_json::to_vec(reply),
            Self::Event(event) => serde_json::to_vec(event),
        }
        .map_err(|source| FrameError::Body {
            kind: kind_name(kind),
            source,
        })?;
        Ok(Frame::new(kind, body))
    }

    /// Decode a frame produced by [`Message::to_frame`].
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let body_err = |source| FrameError::Body {
            kind: kind_name(frame.kind),
            source,
        };
        match frame.kind {
            INVOKE => serde_json::from_slice(&frame.payload)
                .map(Self::Invoke)
                .map_err(body_err),
            REPLY => serde_json::from_slice(&frame.payload)
                .map(Self::Reply)
                .map_err(body_err),
            EVENT => serde_json::from_slice(&frame.payload)
                .map(Self::Event)
                .map_err(body_err),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}
