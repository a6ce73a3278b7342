use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod envinfo;
pub mod invoke;
pub mod serve;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo handlers (echo, countdown, fail).
    Serve(ServeArgs),
    /// Invoke a channel, printing callback events and the result.
    Invoke(InvokeArgs),
    /// Print build and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args).await,
        Command::Invoke(args) => invoke::run(args, format).await,
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after the first client disconnects.
    #[arg(long)]
    pub once: bool,
    /// Delay between countdown ticks in milliseconds.
    #[arg(long, default_value_t = 250)]
    pub tick_ms: u64,
}

#[derive(Args, Debug)]
pub struct InvokeArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    /// Channel to invoke.
    pub channel: String,
    /// Positional argument as JSON (repeatable).
    #[arg(long = "json", value_name = "JSON")]
    pub json: Vec<String>,
    /// Install a printing callback at a path such as `0.on_tick` (repeatable).
    #[arg(long = "callback", value_name = "PATH")]
    pub callback: Vec<String>,
    /// Maximum time to wait for the result (e.g. 5s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {}
