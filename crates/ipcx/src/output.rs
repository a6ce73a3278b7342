use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CallbackOutput<'a> {
    event: &'static str,
    path: &'a str,
    args: &'a [Value],
    timestamp: String,
}

#[derive(Serialize)]
struct ResultOutput<'a> {
    event: &'static str,
    channel: &'a str,
    value: &'a Value,
    timestamp: String,
}

/// One line per callback invocation received from the handler.
pub fn print_callback(path: &str, args: &[Value], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&CallbackOutput {
            event: "callback",
            path,
            args,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Pretty => {
            let args: Vec<String> = args.iter().map(Value::to_string).collect();
            println!("callback {path}({})", args.join(", "));
        }
    }
}

pub fn print_result(channel: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ResultOutput {
            event: "result",
            channel,
            value,
            timestamp: now_unix_seconds(),
        }),
        OutputFormat::Pretty => {
            let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("result {channel} => {rendered}");
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
