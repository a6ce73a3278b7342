use ipcx_envelope::{DebugLevel, SerializeOptions};
use ipcx_frame::FrameConfig;

use crate::channel::PoolOptions;

/// Functions per call above which reply channels are minted instead of pooled.
pub const DEFAULT_HYBRID_THRESHOLD: usize = 3;

/// Endpoint behavior configuration.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Gates payload previews in logs. Default: [`DebugLevel::None`].
    pub debug: DebugLevel,
    /// Serializer limits for outbound arguments.
    pub serialize: SerializeOptions,
    /// Reply-channel pool settings.
    pub pool: PoolOptions,
    /// See [`DEFAULT_HYBRID_THRESHOLD`].
    pub hybrid_threshold: usize,
    /// Treat untagged `{args, fns}` payloads as envelopes. Default: true.
    pub accept_untagged_envelopes: bool,
    /// Frame limits for socket links.
    pub frame: FrameConfig,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            debug: DebugLevel::None,
            serialize: SerializeOptions::default(),
            pool: PoolOptions::default(),
            hybrid_threshold: DEFAULT_HYBRID_THRESHOLD,
            accept_untagged_envelopes: true,
            frame: FrameConfig::default(),
        }
    }
}

impl PeerConfig {
    /// Defaults with the debug level taken from `IPCX_DEBUG`.
    pub fn from_env() -> Self {
        Self::default().with_debug(DebugLevel::from_env())
    }

    pub fn with_debug(mut self, level: DebugLevel) -> Self {
        self.debug = level;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.serialize.max_depth = max_depth;
        self
    }

    pub fn with_pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_hybrid_threshold(mut self, threshold: usize) -> Self {
        self.hybrid_threshold = threshold;
        self
    }

    /// Only accept envelopes that carry the `__ipcx` marker.
    pub fn tagged_envelopes_only(mut self) -> Self {
        self.accept_untagged_envelopes = false;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    /// True when payload previews should be logged.
    pub(crate) fn log_payloads(&self) -> bool {
        self.debug.allows(DebugLevel::Debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PeerConfig::default();
        assert_eq!(config.debug, DebugLevel::None);
        assert_eq!(config.serialize.max_depth, 100);
        assert_eq!(config.hybrid_threshold, 3);
        assert!(config.accept_untagged_envelopes);
        assert!(!config.log_payloads());
    }

    #[test]
    fn builders() {
        let config = PeerConfig::default()
            .with_debug(DebugLevel::Debug)
            .with_max_depth(8)
            .with_hybrid_threshold(0)
            .tagged_envelopes_only();
        assert!(config.log_payloads());
        assert_eq!(config.serialize.max_depth, 8);
        assert_eq!(config.hybrid_threshold, 0);
        assert!(!config.accept_untagged_envelopes);
    }
}
