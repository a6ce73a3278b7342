//! Inbound envelope detection and normalization.

use serde_json::{Map, Value};
use tracing::debug;

use crate::debug::truncate_payload;
use crate::error::{ErrorCode, IpcxError, Result};
use crate::path::{parse_path, Segment};
use crate::types::{FunctionDescriptor, InvokeEnvelope, ENVELOPE_MARKER};

/// Decide whether `payload` is an invoke envelope.
///
/// A value carrying [`ENVELOPE_MARKER`] always is. With `accept_untagged`,
/// any object with list-valued `args` and `fns` is treated as one too.
pub fn is_invoke_envelope(payload: &Value, accept_untagged: bool) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };
    if object.contains_key(ENVELOPE_MARKER) {
        return true;
    }
    accept_untagged
        && object.get("args").is_some_and(Value::is_array)
        && object.get("fns").is_some_and(Value::is_array)
}

/// Validate one raw descriptor against the envelope's `args`.
///
/// `segments` is taken as given when non-empty; otherwise it is parsed from
/// `index` with a leading `args` stripped. Every list index along the path
/// must address an existing slot or the append slot. `position` is the
/// descriptor's place in `fns`, used in errors.
pub fn normalize_descriptor(
    raw: &Value,
    position: usize,
    args: &[Value],
) -> Result<FunctionDescriptor> {
    let invalid = |reason: &str| {
        IpcxError::new(
            ErrorCode::InvalidDescriptor,
            format!("invalid function descriptor at index {position}: {reason}"),
        )
        .with_context("position", position)
        .with_context("descriptor", truncate_payload(&raw.to_string()))
    };

    let object = raw.as_object().ok_or_else(|| invalid("expected object"))?;

    let channel = match object.get("channel") {
        Some(Value::String(channel)) if !channel.is_empty() => channel.clone(),
        _ => return Err(invalid("missing channel")),
    };
    let index = optional_string(object, "index").ok_or_else(|| invalid("index must be a string"))?;

    let given: Vec<Segment> = match object.get("segments") {
        None | Some(Value::Null) => Vec::new(),
        Some(raw_segments) => serde_json::from_value(raw_segments.clone())
            .map_err(|err| invalid(&format!("bad segments: {err}")))?,
    };
    let segments = if given.is_empty() {
        let mut parsed = parse_path(&index);
        if parsed.first() == Some(&Segment::Key("args".to_string())) {
            parsed.remove(0);
        }
        parsed
    } else {
        given
    };
    if segments.is_empty() {
        return Err(invalid("no path to the function"));
    }
    check_target(args, &segments).map_err(|reason| invalid(&reason))?;

    let label = optional_string(object, "label")
        .ok_or_else(|| invalid("label must be a string"))?;
    let label = if label.is_empty() {
        segments
            .last()
            .map(Segment::to_string)
            .unwrap_or_else(|| "fn".to_string())
    } else {
        label
    };

    Ok(FunctionDescriptor {
        label,
        index,
        channel,
        segments,
    })
}

enum Cursor<'a> {
    List(&'a [Value]),
    Map(&'a Map<String, Value>),
    /// A slot that hydration fills with a new container.
    Fresh,
}

impl<'a> Cursor<'a> {
    fn of(value: Option<&'a Value>) -> Self {
        match value {
            Some(Value::Array(items)) => Self::List(items),
            Some(Value::Object(map)) => Self::Map(map),
            _ => Self::Fresh,
        }
    }
}

// Mirrors `set_by_path`: scalar or missing intermediates become new containers.
fn check_target(args: &[Value], segments: &[Segment]) -> std::result::Result<(), String> {
    let mut cursor = Cursor::List(args);
    for segment in segments {
        cursor = match cursor {
            Cursor::List(items) => {
                let index = segment
                    .as_index()
                    .ok_or_else(|| format!("key {segment} addresses a list"))?;
                if index > items.len() {
                    return Err(format!(
                        "index {index} is past the end of a list of {}",
                        items.len()
                    ));
                }
                Cursor::of(items.get(index))
            }
            Cursor::Map(map) => Cursor::of(map.get(&segment.as_key())),
            Cursor::Fresh => match segment.as_index() {
                Some(index) if index > 0 => {
                    return Err(format!("index {index} is past the end of a new list"))
                }
                _ => Cursor::Fresh,
            },
        };
    }
    Ok(())
}

// Missing and null read as empty; any other non-string is `None`.
fn optional_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key) {
        None | Some(Value::Null) => Some(String::new()),
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => None,
    }
}

/// Validate an envelope-shaped payload into an [`InvokeEnvelope`].
///
/// Any failure aborts the whole envelope; nothing is partially hydrated.
pub fn normalize_envelope(payload: &Value, channel: Option<&str>) -> Result<InvokeEnvelope> {
    let with_channel = |err: IpcxError| match channel {
        Some(channel) => err.with_context("channel", channel),
        None => err,
    };

    let object = payload.as_object().ok_or_else(|| {
        with_channel(
            IpcxError::new(
                ErrorCode::InvalidPayload,
                "invalid ipcx payload: expected object",
            )
            .with_context("payload", truncate_payload(&payload.to_string())),
        )
    })?;

    let args = match object.get("args") {
        Some(Value::Array(args)) => args.clone(),
        other => {
            return Err(with_channel(IpcxError::new(
                ErrorCode::InvalidArgs,
                format!("invalid ipcx payload: args must be a list, got {}", json_type(other)),
            )))
        }
    };

    let raw_fns = match object.get("fns") {
        Some(Value::Array(fns)) => fns,
        other => {
            return Err(with_channel(IpcxError::new(
                ErrorCode::InvalidFns,
                format!("invalid ipcx payload: fns must be a list, got {}", json_type(other)),
            )))
        }
    };

    let fns = raw_fns
        .iter()
        .enumerate()
        .map(|(position, raw)| normalize_descriptor(raw, position, &args))
        .collect::<Result<Vec<_>>>()
        .map_err(with_channel)?;

    debug!(
        channel = channel.unwrap_or("unknown"),
        args = args.len(),
        fns = fns.len(),
        "envelope normalized"
    );

    Ok(InvokeEnvelope { args, fns })
}

fn json_type(value: Option<&Value>) -> &'static str {
    match value {
        None => "nothing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "list",
        Some(Value::Object(_)) => "object",
    }
}

/// Final positional arguments for an inbound message.
///
/// An envelope yields its own `args`; an absent payload yields `rest`;
/// anything else is prepended to `rest`.
pub fn prepare_inbound_args(
    payload: Option<Value>,
    rest: Vec<Value>,
    accept_untagged: bool,
) -> Vec<Value> {
    match payload {
        Some(payload) if is_invoke_envelope(&payload, accept_untagged) => match payload {
            Value::Object(mut object) => match object.remove("args") {
                Some(Value::Array(args)) => args,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        },
        None => rest,
        Some(payload) => {
            let mut args = Vec::with_capacity(rest.len() + 1);
            args.push(payload);
            args.extend(rest);
            args
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn detection_prefers_marker() {
        assert!(is_invoke_envelope(&json!({"__ipcx": 1, "args": [], "fns": []}), false));
        assert!(is_invoke_envelope(&json!({"__ipcx": 1}), false));
        assert!(is_invoke_envelope(&json!({"args": [], "fns": []}), true));
        assert!(!is_invoke_envelope(&json!({"args": [], "fns": []}), false));
        assert!(!is_invoke_envelope(&json!({"args": [], "fns": {}}), true));
        assert!(!is_invoke_envelope(&json!([1, 2]), true));
        assert!(!is_invoke_envelope(&Value::Null, true));
    }

    #[test]
    fn normalize_accepts_well_formed_envelope() {
        let envelope = normalize_envelope(
            &json!({
                "__ipcx": 1,
                "args": [{"cb": null}],
                "fns": [{"label": "cb", "index": "args[0].cb", "channel": "c_0", "segments": [0, "cb"]}]
            }),
            Some("test-channel"),
        )
        .unwrap();
        assert_eq!(envelope.args, vec![json!({"cb": null})]);
        assert_eq!(envelope.fns[0].segments, vec![Segment::Index(0), Segment::Key("cb".into())]);
    }

    #[test]
    fn segments_fall_back_to_parsed_index() {
        let descriptor = normalize_descriptor(
            &json!({"label": "", "index": "args[2].opts.done", "channel": "c", "segments": []}),
            0,
            &[json!(1), json!(2), json!({"opts": {"done": null}})],
        )
        .unwrap();
        assert_eq!(
            descriptor.segments,
            vec![Segment::Index(2), Segment::Key("opts".into()), Segment::Key("done".into())]
        );
        assert_eq!(descriptor.label, "done");
    }

    #[test]
    fn shape_errors_carry_codes() {
        let err = normalize_envelope(&json!("nope"), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidPayload);

        let err = normalize_envelope(&json!({"args": {}, "fns": []}), Some("ch")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgs);
        assert_eq!(err.context["channel"], "ch");

        let err = normalize_envelope(&json!({"args": [], "fns": "x"}), None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFns);
    }

    #[test]
    fn bad_descriptor_names_its_position() {
        let payload = json!({
            "args": [null, null],
            "fns": [
                {"label": "a", "index": "args[0]", "channel": "c_0", "segments": [0]},
                {"label": "b", "index": "", "channel": "c_1", "segments": []}
            ]
        });
        let err = normalize_envelope(&payload, None).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDescriptor);
        assert_eq!(err.context["position"], 1);

        let err = normalize_descriptor(&json!({"index": "args[0]"}), 3, &[]).unwrap_err();
        assert!(err.message.contains("index 3"));

        let err = normalize_descriptor(&json!({"channel": "c", "segments": [true]}), 0, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDescriptor);
    }

    #[test]
    fn descriptor_paths_must_address_args() {
        let args = [json!(null), json!({"opts": [1, "x"]})];
        let descriptor = |segments: Value| {
            normalize_descriptor(&json!({"channel": "c", "segments": segments}), 0, &args)
        };

        assert!(descriptor(json!([0])).is_ok());
        assert!(descriptor(json!([2])).is_ok());
        assert!(descriptor(json!([1, "opts", 2])).is_ok());
        assert!(descriptor(json!([1, "new", "cb"])).is_ok());
        assert!(descriptor(json!([0, 0])).is_ok());

        for segments in [
            json!([3]),
            json!([18446744073709551615u64]),
            json!([1000000000000u64]),
            json!([1, "opts", 3]),
            json!([0, 1]),
            json!(["cb"]),
        ] {
            let err = descriptor(segments.clone()).unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidDescriptor, "segments {segments}");
        }
    }

    #[test]
    fn envelope_with_out_of_range_index_is_rejected() {
        let payload = json!({
            "__ipcx": 1,
            "args": [null],
            "fns": [{"label": "cb", "index": "args[7]", "channel": "c_0", "segments": [7]}]
        });
        let err = normalize_envelope(&payload, Some("x")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidDescriptor);
        assert!(err.message.contains("past the end"));
        assert_eq!(err.context["channel"], "x");
    }

    #[test]
    fn inbound_args_for_each_payload_shape() {
        let rest = vec![json!("r")];
        assert_eq!(
            prepare_inbound_args(Some(json!({"__ipcx": 1, "args": [1], "fns": []})), rest.clone(), false),
            vec![json!(1)]
        );
        assert_eq!(prepare_inbound_args(None, rest.clone(), true), rest);
        assert_eq!(
            prepare_inbound_args(Some(json!(5)), rest.clone(), true),
            vec![json!(5), json!("r")]
        );
        assert_eq!(
            prepare_inbound_args(Some(json!({"args": [2], "fns": []})), Vec::new(), false),
            vec![json!({"args": [2], "fns": []})]
        );
    }
}
