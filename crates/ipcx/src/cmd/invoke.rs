use std::time::Duration;

use ipcx_envelope::{parse_path, set_by_path, to_plain_args, Arg, ArgList, Callback, Segment};
use ipcx_peer::{connect_with_config, PeerConfig};
use serde_json::Value;
use tracing::debug;

use crate::cmd::InvokeArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_callback, print_result, OutputFormat};

pub async fn run(args: InvokeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let call_args = build_args(&args.json, &args.callback, format)?;

    let endpoint = connect_with_config(&args.path, PeerConfig::from_env())
        .await
        .map_err(|err| peer_error("connect failed", err))?;
    debug!(channel = %args.channel, args = call_args.len(), "invoking");

    let value = tokio::time::timeout(timeout, endpoint.invoke(&args.channel, call_args))
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("invoke timed out after {}", args.timeout),
            )
        })?
        .map_err(|err| peer_error("invoke failed", err))?;

    print_result(&args.channel, &value, format);
    Ok(SUCCESS)
}

/// Positional arguments from `--json`, with a printing callback at each `--callback` path.
fn build_args(json: &[String], callbacks: &[String], format: OutputFormat) -> CliResult<Vec<Arg>> {
    let mut values = Vec::with_capacity(json.len());
    for (position, raw) in json.iter().enumerate() {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            CliError::new(USAGE, format!("--json #{position} is not valid JSON: {err}"))
        })?;
        values.push(Arg::from_plain(value));
    }

    let root = Arg::List(ArgList::from_vec(values));
    for path in callbacks {
        let segments = callback_segments(path)?;
        set_by_path(&root, &segments, Arg::Function(printing_callback(path, format)))
            .map_err(|err| CliError::new(USAGE, format!("--callback {path}: {}", err.message)))?;
    }
    Ok(root.as_list().map(ArgList::snapshot).unwrap_or_default())
}

fn callback_segments(path: &str) -> CliResult<Vec<Segment>> {
    let mut segments = parse_path(path);
    if matches!(segments.first(), Some(Segment::Key(key)) if key == "args") {
        segments.remove(0);
    }
    if segments.first().and_then(Segment::as_index).is_none() {
        return Err(CliError::new(
            USAGE,
            format!("--callback {path}: path must start with an argument index"),
        ));
    }
    Ok(segments)
}

fn printing_callback(path: &str, format: OutputFormat) -> Callback {
    let display = path.to_string();
    Callback::named(path, move |args: Vec<Arg>| {
        let values = to_plain_args(&args)?;
        print_callback(&display, &values, format);
        Ok(())
    })
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
