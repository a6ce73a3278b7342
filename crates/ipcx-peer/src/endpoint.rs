//! One side of a link: request correlation, listeners and handlers.
//!
//! Each endpoint runs a reader task that dispatches inbound messages in
//! arrival order. Replies complete pending invokes, events run listeners
//! inline on the reader task, and invokes are served on spawned tasks so
//! handlers may await.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::FutureExt;
use ipcx_envelope::{
    safe_call, truncate_payload, unwrap_error, wrap_error, Arg, BoxError, ErrorCode, RemoteError,
};
use ipcx_frame::{Event, Invoke, Message};
use ipcx_transport::PeerIdentity;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::channel::{HybridProvider, PoolStats};
use crate::config::PeerConfig;
use crate::error::{PeerError, Result};
use crate::handler::{HandleContext, Handler, Sender};
use crate::hydrate;
use crate::invoke::{prepare_call, Disposer, InvokeHandle};
use crate::link::Link;
use crate::subscription::{self, EventListener, SharedRegistry, Subscription};

type ReplySender = oneshot::Sender<Result<Value>>;

#[derive(Default)]
struct Pending {
    closed: Option<String>,
    waiters: HashMap<u64, ReplySender>,
}

struct Inner {
    config: Arc<PeerConfig>,
    outbound: mpsc::UnboundedSender<Message>,
    peer: Option<PeerIdentity>,
    next_id: AtomicU64,
    pending: Mutex<Pending>,
    listeners: SharedRegistry,
    handlers: Mutex<HashMap<String, Arc<dyn Handler>>>,
    channels: HybridProvider,
    reader: Mutex<Option<AbortHandle>>,
    closed: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A cheaply cloneable handle to one side of a link.
///
/// The reader task stops when the link closes or the last handle drops.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    /// Start serving `link`. Must be called from within a tokio runtime.
    pub fn new(link: Link, config: PeerConfig) -> Self {
        Self::with_setup(link, config, |_| {})
    }

    /// Like [`Endpoint::new`], running `setup` before the first inbound
    /// message is read. Register handlers here to be sure no early invoke
    /// is answered with "no handler".
    pub fn with_setup(link: Link, config: PeerConfig, setup: impl FnOnce(&Endpoint)) -> Self {
        let (outbound, inbound, peer) = link.into_parts();
        let inner = Arc::new(Inner {
            channels: HybridProvider::new(config.pool.clone(), config.hybrid_threshold),
            config: Arc::new(config),
            outbound,
            peer,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Pending::default()),
            listeners: SharedRegistry::default(),
            handlers: Mutex::new(HashMap::new()),
            reader: Mutex::new(None),
            closed: watch::Sender::new(false),
        });
        let endpoint = Self { inner };
        setup(&endpoint);

        let task = tokio::spawn(read_loop(Arc::downgrade(&endpoint.inner), inbound));
        *lock(&endpoint.inner.reader) = Some(task.abort_handle());
        endpoint
    }

    /// Call the handler on `channel` and wait for its result.
    ///
    /// Functions anywhere in `args` are lifted and stay callable by the
    /// handler until the call settles; their listeners are then removed
    /// whether the call succeeded or not. A handler failure comes back as
    /// [`PeerError::Remote`] with the handler's name, message and code.
    pub async fn invoke(&self, channel: &str, args: Vec<Arg>) -> Result<Value> {
        debug!(channel, direction = "send", args = args.len(), "invoking channel");
        let (payload, disposer) = self.prepare(channel, args)?;

        let result = match self.inner.request(channel, payload) {
            Ok(reply) => await_reply(reply).await,
            Err(err) => Err(err),
        };
        disposer.dispose();

        match result.and_then(|value| unwrap_error(value).map_err(PeerError::from)) {
            Ok(value) => {
                debug!(channel, "invoke completed");
                Ok(value)
            }
            Err(err) => {
                error!(channel, error = %err, "invoke failed");
                Err(err)
            }
        }
    }

    /// Like [`Endpoint::invoke`], but callbacks stay live until disposed.
    ///
    /// The call is sent immediately. Release the listeners with
    /// [`InvokeHandle::dispose`] or by dropping every dispose handle.
    pub fn invoke_retained(&self, channel: &str, args: Vec<Arg>) -> Result<InvokeHandle> {
        debug!(channel, direction = "send", args = args.len(), "invoking channel (retained)");
        let (payload, disposer) = self.prepare(channel, args)?;
        let reply = self.inner.request(channel, payload)?;

        let name = channel.to_string();
        let result = Box::pin(async move {
            let value = await_reply(reply).await;
            match value.and_then(|value| unwrap_error(value).map_err(PeerError::from)) {
                Ok(value) => Ok(value),
                Err(err) => {
                    error!(channel = %name, error = %err, "retained invoke failed");
                    Err(err)
                }
            }
        });
        Ok(InvokeHandle::new(result, disposer))
    }

    /// Fire-and-forget event with lifted callbacks.
    ///
    /// The callback listeners are removed as soon as the event is queued.
    pub fn send(&self, channel: &str, args: Vec<Arg>) -> Result<()> {
        debug!(channel, direction = "send", args = args.len(), "sending to channel");
        let (payload, disposer) = self.prepare(channel, args)?;
        let sent = self
            .inner
            .outbound
            .send(Message::event(channel, vec![payload]))
            .map_err(|_| PeerError::Disconnected(format!("cannot send on {channel}: link closed")));
        disposer.dispose();
        if let Err(err) = &sent {
            error!(channel, error = %err, "send failed");
        }
        sent
    }

    /// Listen for events on `channel`.
    ///
    /// Envelope payloads are hydrated, so callbacks sent with
    /// [`Endpoint::send`] arrive as callable proxies. Listener failures are
    /// logged. Listeners run on the reader task and must not block.
    pub fn on<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&HandleContext, Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribe(channel, false, listener)
    }

    /// Like [`Endpoint::on`], removed after the first event.
    pub fn once<F>(&self, channel: &str, listener: F) -> Subscription
    where
        F: Fn(&HandleContext, Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.subscribe(channel, true, listener)
    }

    /// Remove a listener. Same as [`Subscription::dispose`].
    pub fn off(&self, subscription: &Subscription) {
        debug!(channel = subscription.channel(), "removing listener (off)");
        subscription.dispose();
    }

    /// Register the handler for invokes on `channel`, replacing any previous one.
    ///
    /// Callback proxies forward on the same ordered link as the reply, so
    /// forwards made before the handler returns reach the caller before its
    /// result. Forwards made after the handler returns race the caller's
    /// listener teardown and may be dropped; use
    /// [`Endpoint::invoke_retained`] on the calling side for callbacks that
    /// outlive the call.
    pub fn handle<H: Handler>(&self, channel: &str, handler: H) {
        info!(channel, "registering handler");
        let previous = lock(&self.inner.handlers).insert(channel.to_string(), Arc::new(handler));
        if previous.is_some() {
            warn!(channel, "replaced existing handler");
        }
    }

    pub fn remove_handler(&self, channel: &str) -> bool {
        info!(channel, "removing handler");
        lock(&self.inner.handlers).remove(channel).is_some()
    }

    pub fn has_handler(&self, channel: &str) -> bool {
        lock(&self.inner.handlers).contains_key(channel)
    }

    /// Registered listeners across all channels, callback listeners included.
    pub fn listener_count(&self) -> usize {
        subscription::lock(&self.inner.listeners).len()
    }

    /// Registered listeners on one channel.
    pub fn listener_count_on(&self, channel: &str) -> usize {
        subscription::lock(&self.inner.listeners).count(channel)
    }

    /// Occupancy of this endpoint's reply-channel pool.
    pub fn pool_stats(&self) -> PoolStats {
        self.inner.channels.stats()
    }

    /// Plain event sender for this link.
    pub fn sender(&self) -> Sender {
        Sender::new(self.inner.outbound.clone())
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.inner.peer
    }

    pub fn config(&self) -> &PeerConfig {
        &self.inner.config
    }

    /// True once the link has closed. Pending and future invokes fail.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.pending).closed.is_some() || self.inner.outbound.is_closed()
    }

    /// Resolves once the link has closed.
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        if self.is_closed() {
            return;
        }
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn prepare(&self, channel: &str, args: Vec<Arg>) -> Result<(Value, Disposer)> {
        prepare_call(
            channel,
            args,
            &self.inner.config,
            &self.inner.channels,
            &self.inner.listeners,
        )
    }

    fn subscribe<F>(&self, channel: &str, once: bool, listener: F) -> Subscription
    where
        F: Fn(&HandleContext, Vec<Arg>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        info!(channel, once, "registering listener");
        let config = self.inner.config.clone();
        let name = channel.to_string();
        let wrapped: EventListener = Arc::new(move |ctx: &HandleContext, values: Vec<Value>| {
            match hydrate::listener_args(values, ctx, &config) {
                Ok(args) => {
                    debug!(channel = %name, direction = "receive", args = args.len(), "listener invoked");
                    safe_call(|| listener(ctx, args), &format!("listener on {name}"));
                }
                Err(err) => {
                    error!(channel = %name, code = %err.code, "listener hydration error: {err}");
                }
            }
        });
        let id = subscription::lock(&self.inner.listeners).add(channel, once, wrapped);
        Subscription::new(channel, id, &self.inner.listeners)
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("peer", &self.inner.peer)
            .field("listeners", &self.listener_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn context(&self, channel: &str) -> HandleContext {
        HandleContext::new(channel, Sender::new(self.outbound.clone()), self.peer)
    }

    fn request(&self, channel: &str, payload: Value) -> Result<oneshot::Receiver<Result<Value>>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if let Some(reason) = &pending.closed {
                return Err(PeerError::Disconnected(reason.clone()));
            }
            pending.waiters.insert(id, tx);
        }

        if self.config.log_payloads() {
            debug!(channel, id, payload = %truncate_payload(&payload.to_string()), "sending invoke");
        }
        if self.outbound.send(Message::invoke(id, channel, payload)).is_err() {
            lock(&self.pending).waiters.remove(&id);
            return Err(PeerError::Disconnected(format!(
                "cannot invoke {channel}: link closed"
            )));
        }
        Ok(rx)
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Reply(reply) => self.complete(reply.id, reply.payload),
            Message::Event(event) => self.emit(event),
            Message::Invoke(invoke) => self.serve(invoke),
        }
    }

    fn complete(&self, id: u64, payload: Value) {
        match lock(&self.pending).waiters.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(Ok(payload));
            }
            None => debug!(id, "reply for unknown or abandoned request"),
        }
    }

    fn emit(&self, event: Event) {
        let listeners = subscription::lock(&self.listeners).take_for_dispatch(&event.channel);
        if listeners.is_empty() {
            debug!(channel = %event.channel, "no listeners for event");
            return;
        }
        let ctx = self.context(&event.channel);
        for listener in listeners {
            let args = event.args.clone();
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&ctx, args))).is_err() {
                error!(
                    channel = %event.channel,
                    code = %ErrorCode::ListenerError,
                    "listener panicked"
                );
            }
        }
    }

    fn serve(&self, invoke: Invoke) {
        let handler = lock(&self.handlers).get(&invoke.channel).cloned();
        let ctx = self.context(&invoke.channel);
        let config = self.config.clone();
        let outbound = self.outbound.clone();

        tokio::spawn(async move {
            let Invoke { id, channel, payload } = invoke;
            let reply = match handler {
                Some(handler) => run_handler(handler, ctx, payload, &config).await,
                None => {
                    warn!(%channel, "no handler registered");
                    let err = RemoteError::new(format!("no handler registered for channel {channel}"));
                    wrap_error(&err).to_value()
                }
            };
            if config.log_payloads() {
                debug!(%channel, id, reply = %truncate_payload(&reply.to_string()), "sending reply");
            }
            if outbound.send(Message::reply(id, reply)).is_err() {
                debug!(%channel, id, "reply dropped: link closed");
            }
        });
    }

    fn close_pending(&self, reason: &str) {
        let waiters = {
            let mut pending = lock(&self.pending);
            pending.closed = Some(reason.to_string());
            std::mem::take(&mut pending.waiters)
        };
        self.closed.send_replace(true);
        if !waiters.is_empty() {
            warn!(count = waiters.len(), reason, "failing pending invokes");
        }
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(PeerError::Disconnected(reason.to_string())));
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
    }
}

async fn read_loop(inner: Weak<Inner>, mut inbound: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = inbound.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.dispatch(message);
    }
    if let Some(inner) = inner.upgrade() {
        inner.close_pending("link closed");
    }
    debug!("endpoint reader stopped");
}

async fn await_reply(reply: oneshot::Receiver<Result<Value>>) -> Result<Value> {
    reply
        .await
        .unwrap_or_else(|_| Err(PeerError::Disconnected("reply abandoned".to_string())))
}

async fn run_handler(
    handler: Arc<dyn Handler>,
    ctx: HandleContext,
    payload: Value,
    config: &PeerConfig,
) -> Value {
    let channel = ctx.channel().to_string();
    match AssertUnwindSafe(call_handler(handler, ctx, payload, config))
        .catch_unwind()
        .await
    {
        Ok(reply) => reply,
        Err(_) => {
            error!(%channel, "handler panicked");
            wrap_error(&RemoteError::new(format!("handler for {channel} panicked"))).to_value()
        }
    }
}

async fn call_handler(
    handler: Arc<dyn Handler>,
    ctx: HandleContext,
    payload: Value,
    config: &PeerConfig,
) -> Value {
    let channel = ctx.channel().to_string();
    let args = match hydrate::handler_args(payload, &ctx, config) {
        Ok(args) => args,
        Err(err) => {
            error!(%channel, code = %err.code, "hydration failed: {err}");
            return wrap_error(&err).to_value();
        }
    };

    match handler.call(ctx, args).await {
        Ok(value) => {
            debug!(%channel, "handler completed");
            value
        }
        Err(err) => {
            error!(%channel, error = %err, "handler error");
            wrap_error(err.as_ref()).to_value()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;

    use super::*;

    fn pair() -> (Endpoint, Endpoint) {
        let (left, right) = Link::pair();
        (
            Endpoint::new(left, PeerConfig::default()),
            Endpoint::new(right, PeerConfig::default()),
        )
    }

    #[tokio::test]
    async fn plain_invoke_round_trip() {
        let (client, server) = pair();
        server.handle("echo", |_ctx: HandleContext, args: Vec<Arg>| async move {
            Ok::<_, BoxError>(args[0].to_plain()?)
        });
        let value = client.invoke("echo", vec![Arg::from("hi")]).await.unwrap();
        assert_eq!(value, json!("hi"));
        assert_eq!(client.listener_count(), 0);
    }

    #[tokio::test]
    async fn missing_handler_is_remote_error() {
        let (client, _server) = pair();
        let err = client.invoke("nobody", Vec::new()).await.unwrap_err();
        let remote = err.as_remote().unwrap();
        assert!(remote.message.contains("nobody"));
    }

    #[tokio::test]
    async fn remove_handler_stops_serving() {
        let (client, server) = pair();
        server.handle("x", |_ctx: HandleContext, _args: Vec<Arg>| async {
            Ok::<_, BoxError>(json!(1))
        });
        assert!(server.has_handler("x"));
        assert!(server.remove_handler("x"));
        assert!(!server.remove_handler("x"));
        assert!(client.invoke("x", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn panicking_handler_replies_with_error() {
        let (client, server) = pair();
        server.handle("boom", |_ctx: HandleContext, _args: Vec<Arg>| async {
            if true {
                panic!("handler bug");
            }
            Ok::<_, BoxError>(Value::Null)
        });
        let err = client.invoke("boom", Vec::new()).await.unwrap_err();
        assert!(err.as_remote().unwrap().message.contains("panicked"));
    }

    async fn raw_reply(envelope: Value) -> Value {
        let (left, right) = Link::pair();
        let server = Endpoint::new(right, PeerConfig::default());
        server.handle("x", |_ctx: HandleContext, _args: Vec<Arg>| async {
            Ok::<_, BoxError>(json!("unreachable"))
        });
        let (outbound, mut inbound, _) = left.into_parts();
        outbound.send(Message::invoke(1, "x", envelope)).unwrap();
        let reply = tokio::time::timeout(std::time::Duration::from_secs(5), inbound.recv())
            .await
            .expect("reply within timeout")
            .expect("link open");
        match reply {
            Message::Reply(reply) => {
                assert_eq!(reply.id, 1);
                reply.payload
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_descriptor_gets_error_reply() {
        for index in [json!(7), json!(u64::MAX)] {
            let payload = raw_reply(json!({
                "__ipcx": 1,
                "args": [null],
                "fns": [{"channel": "cb_0", "index": "", "segments": [index]}],
            }))
            .await;
            let remote = unwrap_error(payload).unwrap_err();
            assert_eq!(remote.code.as_deref(), Some("IPCX_E1004"));
        }
    }

    #[tokio::test]
    async fn panicking_listener_does_not_stop_dispatch() {
        let (client, server) = pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let _bad = server.on("tick", |_ctx: &HandleContext, _args: Vec<Arg>| {
            if true {
                panic!("listener bug");
            }
            Ok(())
        });
        let counter = hits.clone();
        let _good = server.on("tick", move |_ctx: &HandleContext, _args: Vec<Arg>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        server.handle("sync", |_ctx: HandleContext, _args: Vec<Arg>| async {
            Ok::<_, BoxError>(Value::Null)
        });

        client.sender().send("tick", vec![]).unwrap();
        client.sender().send("tick", vec![]).unwrap();
        client.invoke("sync", Vec::new()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!server.is_closed());
    }

    #[tokio::test]
    async fn once_listener_fires_once() {
        let (client, server) = pair();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let subscription = server.once("tick", move |_ctx: &HandleContext, _args: Vec<Arg>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(subscription.channel(), "tick");

        client.sender().send("tick", vec![]).unwrap();
        client.sender().send("tick", vec![]).unwrap();
        // Round trip so both events have been dispatched.
        server.handle("sync", |_ctx: HandleContext, _args: Vec<Arg>| async {
            Ok::<_, BoxError>(Value::Null)
        });
        client.invoke("sync", Vec::new()).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(server.listener_count_on("tick"), 0);
    }

    #[tokio::test]
    async fn invoke_fails_when_link_closes() {
        let (left, right) = Link::pair();
        let client = Endpoint::new(left, PeerConfig::default());
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.invoke("slow", Vec::new()).await }
        });
        tokio::task::yield_now().await;
        drop(right);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, PeerError::Disconnected(_)));
        assert!(matches!(
            client.invoke("slow", Vec::new()).await.unwrap_err(),
            PeerError::Disconnected(_)
        ));
        assert!(client.is_closed());
        client.closed().await;
    }
}
