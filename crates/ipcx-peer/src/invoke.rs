//! Caller side: lifting callbacks and keeping their listeners alive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ipcx_envelope::{
    count_functions, get_by_path, serialize_args_with, truncate_payload, Arg, ArgList, ErrorCode,
    IpcxError,
};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::channel::{ChannelLease, HybridProvider};
use crate::config::PeerConfig;
use crate::error::Result;
use crate::handler::{BoxFuture, HandleContext};
use crate::subscription::{lock, EventListener, SharedRegistry, Subscription};

/// Per-call listeners and the channel lease behind them.
pub(crate) struct Disposer {
    channel: String,
    subscriptions: Mutex<Vec<Subscription>>,
    lease: Mutex<Option<ChannelLease>>,
    disposed: AtomicBool,
}

impl Disposer {
    /// Remove every listener, then give the channel name back.
    pub(crate) fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscriptions = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        debug!(
            channel = %self.channel,
            count = subscriptions.len(),
            "disposing callback listeners"
        );
        for subscription in &subscriptions {
            subscription.dispose();
        }
        if let Some(lease) = self
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            lease.release();
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Releases the callback listeners of a retained invoke.
///
/// Cloneable; the listeners are also released when the last clone drops.
#[derive(Clone)]
pub struct DisposeHandle {
    inner: Arc<Disposer>,
}

impl DisposeHandle {
    /// Remove the call's listeners. Later calls do nothing.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl std::fmt::Debug for DisposeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposeHandle")
            .field("channel", &self.inner.channel)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// A call whose callbacks stay live after the result arrives.
pub struct InvokeHandle {
    result: BoxFuture<'static, Result<Value>>,
    dispose: DisposeHandle,
}

impl InvokeHandle {
    pub(crate) fn new(result: BoxFuture<'static, Result<Value>>, disposer: Disposer) -> Self {
        Self {
            result,
            dispose: DisposeHandle {
                inner: Arc::new(disposer),
            },
        }
    }

    /// A handle that releases this call's listeners.
    pub fn dispose_handle(&self) -> DisposeHandle {
        self.dispose.clone()
    }

    pub fn dispose(&self) {
        self.dispose.dispose();
    }

    /// Split into the result future and the dispose handle.
    pub fn into_parts(self) -> (BoxFuture<'static, Result<Value>>, DisposeHandle) {
        (self.result, self.dispose)
    }
}

/// Serialize `args` and register one listener per lifted function.
///
/// Serialization happens before any listener is registered; a failure
/// leaves nothing behind.
pub(crate) fn prepare_call(
    channel: &str,
    args: Vec<Arg>,
    config: &PeerConfig,
    channels: &HybridProvider,
    registry: &SharedRegistry,
) -> Result<(Value, Disposer)> {
    let function_count = count_functions(&args, config.serialize.max_depth);
    let lease = channels.acquire(function_count);
    let serialized = serialize_args_with(&args, lease.channel(), config.serialize)?;

    debug!(
        channel,
        base = lease.channel(),
        args = serialized.args.len(),
        functions = serialized.descriptors.len(),
        "payload prepared"
    );

    let root = Arg::List(ArgList::from_vec(args));
    let mut subscriptions = Vec::with_capacity(serialized.descriptors.len());
    {
        let mut listeners = lock(registry);
        for descriptor in &serialized.descriptors {
            let listener = forwarder(
                channel,
                root.clone(),
                descriptor.index.clone(),
                descriptor.segments.clone(),
            );
            let id = listeners.add(&descriptor.channel, false, listener);
            subscriptions.push(Subscription::new(&descriptor.channel, id, registry));
        }
    }

    let disposer = Disposer {
        channel: channel.to_string(),
        subscriptions: Mutex::new(subscriptions),
        lease: Mutex::new(Some(lease)),
        disposed: AtomicBool::new(false),
    };

    let envelope = serialized.into_envelope().to_value()?;
    if config.log_payloads() {
        debug!(channel, envelope = %truncate_payload(&envelope.to_string()), "envelope built");
    }
    Ok((envelope, disposer))
}

/// Listener that runs the caller's function at `segments` with forwarded args.
fn forwarder(
    channel: &str,
    root: Arg,
    index: String,
    segments: Vec<ipcx_envelope::Segment>,
) -> EventListener {
    let channel = channel.to_string();
    Arc::new(move |_ctx: &HandleContext, values: Vec<Value>| {
        let Some(Arg::Function(target)) = get_by_path(&root, &segments) else {
            warn!(%channel, callback = %index, "callback target is not a function");
            return;
        };
        debug!(%channel, callback = %index, args = values.len(), "executing callback");
        let args = values.into_iter().map(Arg::from_plain).collect();
        match panic::catch_unwind(AssertUnwindSafe(|| target.call(args))) {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                let err = IpcxError::callback_failed(&index, err.as_ref());
                error!(%channel, callback = %index, code = %err.code, "{err}");
            }
            Err(_) => {
                let err = IpcxError::new(
                    ErrorCode::CallbackFailed,
                    format!("callback panicked: {index}"),
                )
                .with_context("callback", index.as_str());
                error!(%channel, callback = %index, code = %err.code, "{err}");
            }
        }
    })
}
