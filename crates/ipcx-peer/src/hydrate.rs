//! Callee side: turning inbound payloads into handler arguments.

use ipcx_envelope::{
    is_invoke_envelope, normalize_envelope, prepare_inbound_args, set_by_path, to_plain_args,
    truncate_payload, Arg, ArgList, Callback, ErrorCode, FunctionDescriptor, IpcxError,
};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::PeerConfig;
use crate::handler::{HandleContext, Sender};

/// Normalize an envelope and splice in one proxy per descriptor.
pub(crate) fn hydrate_envelope(
    payload: &Value,
    ctx: &HandleContext,
) -> ipcx_envelope::Result<Vec<Arg>> {
    let envelope = normalize_envelope(payload, Some(ctx.channel()))?;
    debug!(
        channel = ctx.channel(),
        args = envelope.args.len(),
        fns = envelope.fns.len(),
        "hydrating payload"
    );

    let root = Arg::List(ArgList::from_vec(
        envelope.args.into_iter().map(Arg::from_plain).collect(),
    ));
    for descriptor in envelope.fns {
        let segments = descriptor.segments.clone();
        let proxy = proxy(ctx.sender().clone(), ctx.channel(), descriptor);
        set_by_path(&root, &segments, Arg::Function(proxy))?;
    }

    Ok(root.as_list().map(ArgList::snapshot).unwrap_or_default())
}

/// Arguments for a handler. Non-envelope payloads fall back to `[payload]`.
pub(crate) fn handler_args(
    payload: Value,
    ctx: &HandleContext,
    config: &PeerConfig,
) -> ipcx_envelope::Result<Vec<Arg>> {
    let is_envelope = is_invoke_envelope(&payload, config.accept_untagged_envelopes);
    debug!(channel = ctx.channel(), is_envelope, "handler invoked");
    if is_envelope {
        return hydrate_envelope(&payload, ctx);
    }

    warn!(
        channel = ctx.channel(),
        payload_type = json_kind(&payload),
        "non-ipcx payload, using fallback mode"
    );
    if payload.is_null() {
        Ok(Vec::new())
    } else {
        Ok(vec![Arg::from_plain(payload)])
    }
}

/// Arguments for an event listener. The first event argument is the payload.
pub(crate) fn listener_args(
    values: Vec<Value>,
    ctx: &HandleContext,
    config: &PeerConfig,
) -> ipcx_envelope::Result<Vec<Arg>> {
    let mut values = values.into_iter();
    let payload = values.next();
    let rest: Vec<Value> = values.collect();

    if config.log_payloads() {
        if let Some(payload) = &payload {
            debug!(
                channel = ctx.channel(),
                payload = %truncate_payload(&payload.to_string()),
                "payload format detection"
            );
        }
    }

    match payload {
        Some(payload) if is_invoke_envelope(&payload, config.accept_untagged_envelopes) => {
            hydrate_envelope(&payload, ctx)
        }
        payload => Ok(prepare_inbound_args(payload, rest, config.accept_untagged_envelopes)
            .into_iter()
            .map(Arg::from_plain)
            .collect()),
    }
}

/// A stand-in for the caller's function that forwards its arguments back.
///
/// Forwarding never fails the handler: a closed sender or unsendable
/// arguments are logged and dropped.
fn proxy(sender: Sender, call_channel: &str, descriptor: FunctionDescriptor) -> Callback {
    let call_channel = call_channel.to_string();
    Callback::named(descriptor.label.clone(), move |args: Vec<Arg>| {
        if sender.is_closed() {
            let err = IpcxError::new(ErrorCode::SenderMissing, "sender missing or closed for callback")
                .with_context("callback", descriptor.index.as_str());
            error!(channel = %call_channel, callback = %descriptor.index, code = %err.code, "{err}");
            return Ok(());
        }

        debug!(
            channel = %call_channel,
            callback = %descriptor.index,
            args = args.len(),
            "executing callback proxy"
        );

        let forwarded = to_plain_args(&args)
            .map_err(|err| IpcxError::callback_failed(&descriptor.index, &err))
            .and_then(|values| {
                sender.send_values(&descriptor.channel, values).map_err(|err| {
                    IpcxError::callback_failed(&descriptor.index, &err)
                })
            });
        if let Err(err) = forwarded {
            error!(channel = %call_channel, callback = %descriptor.index, code = %err.code, "{err}");
        }
        Ok(())
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use ipcx_frame::Message;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    fn context() -> (HandleContext, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (HandleContext::new("test-channel", Sender::new(tx), None), rx)
    }

    fn envelope() -> Value {
        json!({
            "__ipcx": 1,
            "args": [{"cb": null, "n": 1}],
            "fns": [{"label": "cb", "index": "args[0].cb", "channel": "reply_0", "segments": [0, "cb"]}]
        })
    }

    #[test]
    fn proxies_are_spliced_in_place() {
        let (ctx, mut rx) = context();
        let args = hydrate_envelope(&envelope(), &ctx).unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].get("n").unwrap().as_i64(), Some(1));

        let cb = args[0].get("cb").unwrap();
        cb.as_callback().unwrap().call(vec![Arg::from("ok")]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Message::event("reply_0", vec![json!("ok")]));
    }

    #[test]
    fn proxy_swallows_unsendable_args_and_closed_sender() {
        let (ctx, mut rx) = context();
        let args = hydrate_envelope(&envelope(), &ctx).unwrap();
        let cb = args[0].get("cb").unwrap();
        let cb = cb.as_callback().unwrap();

        assert!(cb.call(vec![Arg::function(|_| Ok(()))]).is_ok());
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(cb.call(vec![Arg::from(1)]).is_ok());
    }

    #[test]
    fn invalid_envelope_aborts_hydration() {
        let (ctx, _rx) = context();
        let bad = json!({"__ipcx": 1, "args": [], "fns": [{"label": "x"}]});
        let err = hydrate_envelope(&bad, &ctx).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDescriptor);
    }

    #[test]
    fn handler_fallback_for_raw_payloads() {
        let (ctx, _rx) = context();
        let config = PeerConfig::default();
        assert!(handler_args(Value::Null, &ctx, &config).unwrap().is_empty());
        let args = handler_args(json!("raw"), &ctx, &config).unwrap();
        assert_eq!(args[0].as_str(), Some("raw"));
    }

    #[test]
    fn untagged_envelopes_follow_config() {
        let (ctx, _rx) = context();
        let untagged = json!({"args": [7], "fns": []});

        let args = handler_args(untagged.clone(), &ctx, &PeerConfig::default()).unwrap();
        assert_eq!(args[0].as_i64(), Some(7));

        let strict = PeerConfig::default().tagged_envelopes_only();
        let args = handler_args(untagged, &ctx, &strict).unwrap();
        assert!(args[0].get("args").is_some());
    }

    #[test]
    fn listener_args_for_raw_events() {
        let (ctx, _rx) = context();
        let args = listener_args(vec![json!(1), json!("two")], &ctx, &PeerConfig::default()).unwrap();
        assert_eq!(args.len(), 2);
        assert_eq!(args[1].as_str(), Some("two"));
        assert!(listener_args(Vec::new(), &ctx, &PeerConfig::default())
            .unwrap()
            .is_empty());
    }
}
