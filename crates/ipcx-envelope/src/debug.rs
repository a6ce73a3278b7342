//! `IPCX_DEBUG` verbosity and payload previews.

use std::fmt;
use std::str::FromStr;

use tracing::level_filters::LevelFilter;

/// Payload previews longer than this many characters are cut.
pub const PAYLOAD_PREVIEW_LIMIT: usize = 500;

/// Verbosity of the ipcx layer, ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DebugLevel {
    #[default]
    None,
    Error,
    Warn,
    Info,
    Debug,
}

impl DebugLevel {
    /// Environment variable read by [`DebugLevel::from_env`].
    pub const ENV_VAR: &'static str = "IPCX_DEBUG";

    /// Parse a level name, case-insensitively. `true` and `1` mean `info`;
    /// anything unrecognized is `none`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "info" => Self::Info,
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            _ => Self::None,
        }
    }

    pub fn from_env() -> Self {
        std::env::var(Self::ENV_VAR)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    /// True if messages at `level` should be emitted.
    pub fn allows(self, level: DebugLevel) -> bool {
        level != Self::None && self >= level
    }

    /// Equivalent `tracing` filter.
    pub fn as_filter(self) -> LevelFilter {
        match self {
            Self::None => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DebugLevel {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

/// Cut `payload` to [`PAYLOAD_PREVIEW_LIMIT`] characters for logging.
pub fn truncate_payload(payload: &str) -> String {
    let total = payload.chars().count();
    if total <= PAYLOAD_PREVIEW_LIMIT {
        return payload.to_string();
    }
    let head: String = payload.chars().take(PAYLOAD_PREVIEW_LIMIT).collect();
    format!("{head}... (truncated, total {total} chars)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!(DebugLevel::parse("DEBUG"), DebugLevel::Debug);
        assert_eq!(DebugLevel::parse("warn"), DebugLevel::Warn);
        assert_eq!(DebugLevel::parse("true"), DebugLevel::Info);
        assert_eq!(DebugLevel::parse("1"), DebugLevel::Info);
        assert_eq!(DebugLevel::parse("verbose"), DebugLevel::None);
        assert_eq!(DebugLevel::parse(""), DebugLevel::None);
        assert_eq!("Error".parse::<DebugLevel>().unwrap(), DebugLevel::Error);
    }

    #[test]
    fn allows_is_ordered() {
        assert!(DebugLevel::Debug.allows(DebugLevel::Info));
        assert!(DebugLevel::Warn.allows(DebugLevel::Error));
        assert!(!DebugLevel::Warn.allows(DebugLevel::Info));
        assert!(!DebugLevel::None.allows(DebugLevel::Error));
        assert!(!DebugLevel::Debug.allows(DebugLevel::None));
    }

    #[test]
    fn filter_mapping() {
        assert_eq!(DebugLevel::None.as_filter(), LevelFilter::OFF);
        assert_eq!(DebugLevel::Debug.as_filter(), LevelFilter::DEBUG);
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_payload("short"), "short");

        let long = "é".repeat(PAYLOAD_PREVIEW_LIMIT + 20);
        let preview = truncate_payload(&long);
        assert!(preview.ends_with("... (truncated, total 520 chars)"));
        assert_eq!(preview.chars().filter(|c| *c == 'é').count(), PAYLOAD_PREVIEW_LIMIT);
    }
}
