//! Configuration structures for the cco proxy.

#![deny(missing_docs)]

mod headers;
mod provider;

use serde::Deserialize;

pub use headers::HeaderRule;
pub use provider::{ProviderConfig, ProviderType, ProvidersConfig};

/// Top-level configuration for the canonical `/v1/messages` frontend.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configured upstream providers, keyed by provider name.
    pub providers: ProvidersConfig,

    /// Overall per-request deadline, in seconds, applied by the dispatcher.
    pub request_timeout_secs: u64,

    /// Idle-read timeout, in seconds, applied by the streaming pump between
    /// upstream chunks.
    pub stream_idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: ProvidersConfig::default(),
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file path.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.as_ref().display()))?;

        toml::from_str(&text).map_err(|e| anyhow::anyhow!("failed to parse config file: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 120);
        assert!(config.providers.providers.is_empty());
    }
}
