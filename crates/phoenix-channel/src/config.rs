// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Channel defaults and the storage port they are loaded through.
//!
//! The core never touches the file system. Hosts supply a [`ConfigStore`]
//! (file, keychain, in-memory for tests) and read [`ChannelConfig`] through a
//! [`ConfigService`], which owns the JSON encoding.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::{default_rejoin_policy, TimeoutPolicy, DEFAULT_TIMEOUT};

/// Key under which [`ChannelConfig`] is stored.
pub const CHANNEL_CONFIG_KEY: &str = "phoenix_channel";

/// Per-channel defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Push timeout when the caller gives none, in milliseconds.
    pub default_timeout_ms: u64,
    /// Policy for join and rejoin attempts.
    pub rejoin: TimeoutPolicy,
}

impl ChannelConfig {
    /// [`default_timeout_ms`](Self::default_timeout_ms) as a duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
            rejoin: default_rejoin_policy(),
        }
    }
}

/// Where the host keeps channel settings: a file, a keychain entry, an
/// in-memory map in tests. Documents are opaque JSON bytes under a key such
/// as [`CHANNEL_CONFIG_KEY`].
pub trait ConfigStore {
    /// Bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace the document under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Failure loading or saving channel settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No document under the requested key; callers fall back to defaults.
    #[error("not found")]
    NotFound,
    /// The host store could not be read or written.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The stored document is not valid channel settings JSON.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Any other store failure, as reported by the host.
    #[error("other: {0}")]
    Other(String),
}

/// Reads and writes channel settings through a host [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap the host store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Give the host store back.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decode the JSON document under `key`; a missing or empty document is
    /// `Ok(None)` so a fresh install runs on defaults.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Store `value` under `key` as pretty-printed JSON, readable by hand.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Channel defaults, falling back to [`ChannelConfig::default`] when unset.
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        Ok(self.load(CHANNEL_CONFIG_KEY)?.unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_protocol_constants() {
        let cfg = ChannelConfig::default();
        assert_eq!(cfg.default_timeout(), DEFAULT_TIMEOUT);
        assert_eq!(cfg.rejoin, default_rejoin_policy());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let cfg: ChannelConfig = serde_json::from_value(json!({"default_timeout_ms": 500})).unwrap();
        assert_eq!(cfg.default_timeout(), Duration::from_millis(500));
        assert_eq!(cfg.rejoin, default_rejoin_policy());
    }

    #[test]
    fn rejoin_policy_is_configurable() {
        let cfg: ChannelConfig = serde_json::from_value(json!({
            "rejoin": {"kind": "backoff", "first_ms": 100, "factor": 2.0, "max_ms": 3000}
        }))
        .unwrap();
        assert_eq!(cfg.rejoin.duration(1), Duration::from_millis(200));
        assert_eq!(cfg.rejoin.duration(10), Duration::from_secs(3));
    }
}
