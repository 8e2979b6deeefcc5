// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use phoenix_channel::config::CHANNEL_CONFIG_KEY;
use phoenix_channel::{ChannelConfig, ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory implementation of [`ConfigStore`].
///
/// Clones share state. Call counts include failed attempts.
///
/// # Example
///
/// ```
/// use phoenix_channel::ConfigService;
/// use phoenix_dry_tests::InMemoryConfigStore;
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// let cfg = service.channel_config().unwrap();
/// assert_eq!(cfg, Default::default());
/// assert_eq!(store.load_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<InMemoryConfigStoreInner>>,
}

#[derive(Default)]
struct InMemoryConfigStoreInner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `config` under the channel config key.
    pub fn with_channel_config(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let store = Self::new();
        let bytes = serde_json::to_vec(config)?;
        store
            .lock()
            .data
            .insert(CHANNEL_CONFIG_KEY.to_owned(), bytes);
        Ok(store)
    }

    /// Store raw bytes under `key` without counting a save.
    pub fn insert_raw(&self, key: &str, data: &[u8]) {
        self.lock().data.insert(key.to_owned(), data.to_vec());
    }

    /// Make every `load_raw` fail.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Make every `save_raw` fail.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` calls, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` calls, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, InMemoryConfigStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;
        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }
        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;
        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }
        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use phoenix_channel::{ConfigService, TimeoutPolicy};
    use std::time::Duration;

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let service = ConfigService::new(InMemoryConfigStore::new());
        assert_eq!(service.channel_config().unwrap(), ChannelConfig::default());
    }

    #[test]
    fn saved_config_is_loaded_back() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        let cfg = ChannelConfig {
            default_timeout_ms: 2_000,
            rejoin: TimeoutPolicy::fixed(Duration::from_secs(3)),
        };
        service.save(CHANNEL_CONFIG_KEY, &cfg).unwrap();

        assert!(store.contains_key(CHANNEL_CONFIG_KEY));
        assert_eq!(service.channel_config().unwrap(), cfg);
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn seeded_store_serves_channel_config() {
        let cfg = ChannelConfig {
            default_timeout_ms: 750,
            ..ChannelConfig::default()
        };
        let store = InMemoryConfigStore::with_channel_config(&cfg).unwrap();
        let loaded = ConfigService::new(store).channel_config().unwrap();
        assert_eq!(loaded.default_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn load_failure_is_propagated_and_counted() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_load(true);
        let service = ConfigService::new(store.clone());
        assert!(matches!(service.channel_config(), Err(ConfigError::Other(_))));
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn failed_save_stores_nothing() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(store.save_raw("k", b"v").is_err());
        assert!(!store.contains_key("k"));
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn malformed_document_is_a_serde_error() {
        let store = InMemoryConfigStore::new();
        store.insert_raw(CHANNEL_CONFIG_KEY, b"{not json");
        let service = ConfigService::new(store);
        assert!(matches!(service.channel_config(), Err(ConfigError::Serde(_))));
    }

    #[test]
    fn empty_document_counts_as_missing() {
        let store = InMemoryConfigStore::new();
        store.insert_raw(CHANNEL_CONFIG_KEY, b"");
        let service = ConfigService::new(store);
        assert_eq!(service.channel_config().unwrap(), ChannelConfig::default());
    }
}
