use ipcx_envelope::ENVELOPE_VERSION;
use ipcx_peer::PeerConfig;
use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

/// Build identity plus the limits an endpoint would run with here.
#[derive(Serialize)]
struct EnvInfo {
    version: &'static str,
    target: &'static str,
    envelope_version: u64,
    debug_level: String,
    max_depth: usize,
    max_payload_size: usize,
    hybrid_threshold: usize,
    pool_size: usize,
    accept_untagged_envelopes: bool,
}

impl EnvInfo {
    fn collect(config: &PeerConfig) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            target: option_env!("IPCX_BUILD_TARGET").unwrap_or(std::env::consts::ARCH),
            envelope_version: ENVELOPE_VERSION,
            debug_level: config.debug.to_string(),
            max_depth: config.serialize.max_depth,
            max_payload_size: config.frame.max_payload_size,
            hybrid_threshold: config.hybrid_threshold,
            pool_size: config.pool.pool_size,
            accept_untagged_envelopes: config.accept_untagged_envelopes,
        }
    }
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let info = EnvInfo::collect(&PeerConfig::from_env());
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Pretty => {
            println!("ipcx {} ({})", info.version, info.target);
            println!("  envelope      v{}", info.envelope_version);
            println!("  IPCX_DEBUG    {}", info.debug_level);
            println!("  max depth     {}", info.max_depth);
            println!("  max payload   {} bytes", info.max_payload_size);
            println!(
                "  channels      pool of {}, minted above {} callbacks",
                info.pool_size, info.hybrid_threshold
            );
            println!("  untagged      {}", info.accept_untagged_envelopes);
        }
    }
    Ok(SUCCESS)
}
