//! Handler trait and the context handed to handlers and listeners.

use std::future::Future;
use std::pin::Pin;

use ipcx_envelope::{to_plain_args, Arg, BoxError};
use ipcx_frame::Message;
use ipcx_transport::PeerIdentity;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{PeerError, Result};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A remote-callable entry point registered with [`crate::Endpoint::handle`].
///
/// Implemented for any `Fn(HandleContext, Vec<Arg>) -> impl Future` closure.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: HandleContext, args: Vec<Arg>) -> BoxFuture<'static, std::result::Result<Value, BoxError>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(HandleContext, Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
{
    fn call(&self, ctx: HandleContext, args: Vec<Arg>) -> BoxFuture<'static, std::result::Result<Value, BoxError>> {
        Box::pin(self(ctx, args))
    }
}

/// Pushes events to the remote endpoint.
#[derive(Debug, Clone)]
pub struct Sender {
    outbound: mpsc::UnboundedSender<Message>,
}

impl Sender {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self { outbound }
    }

    /// Send plain arguments as an event. Functions are rejected.
    pub fn send(&self, channel: &str, args: Vec<Arg>) -> Result<()> {
        let values = to_plain_args(&args)?;
        self.send_values(channel, values)
    }

    pub fn send_values(&self, channel: &str, values: Vec<Value>) -> Result<()> {
        self.outbound
            .send(Message::event(channel, values))
            .map_err(|_| PeerError::Disconnected(format!("cannot send on {channel}: link closed")))
    }

    /// True once the remote side can no longer receive.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// Context passed to handlers and event listeners.
#[derive(Debug, Clone)]
pub struct HandleContext {
    channel: String,
    sender: Sender,
    peer: Option<PeerIdentity>,
}

impl HandleContext {
    pub(crate) fn new(channel: &str, sender: Sender, peer: Option<PeerIdentity>) -> Self {
        Self {
            channel: channel.to_string(),
            sender,
            peer,
        }
    }

    /// The channel the call or event arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Route back to the endpoint that sent the call.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Credentials of the remote process, for socket links.
    pub fn peer(&self) -> Option<PeerIdentity> {
        self.peer
    }
}
