//! The configuration provider: lifecycle-gated load/store of the shared
//! snapshot plus the pseudo-lock factory.
//!
//! The write path is a single-key compare-and-swap: the caller presents the
//! version it last observed, and the store commits only if nothing has been
//! written since. A lost race comes back as [`StoreOutcome::Conflict`] — an
//! ordinary value, not an error — and the caller reloads and retries its own
//! change. The provider keeps no retry policy and no mutable state beyond the
//! lifecycle byte, so arbitrarily many concurrent writers compose correctly.

use crate::config::{codec, CodecError, ConfigSnapshot, LoadedConfig, Version};
use crate::lock::PseudoLock;
use crate::store::{CasOutcome, CoordStore, StoreError};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const CONFIG_CHILD: &str = "configs";
const LOCK_CHILD: &str = "locks";

/// Provider errors.
///
/// Expected outcomes (`Conflict`, lock timeout) are not here: they are
/// returned as values so retry loops stay cheap and explicit.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider already started")]
    AlreadyStarted,

    #[error("Provider is not active")]
    NotActive,

    #[error("Backing store unavailable at {path}: {source}")]
    StoreUnavailable {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to decode configuration at {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("Backing store failure at {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: StoreError,
    },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Translates store-layer failures into the provider taxonomy. The only place
/// that inspects [`StoreError`] variants: the store's explicit unavailable
/// signal stays retryable, everything else is wrapped as fatal.
pub(crate) fn map_store_err(path: &str, source: StoreError) -> ProviderError {
    match source {
        StoreError::Unavailable(_) => ProviderError::StoreUnavailable {
            path: path.to_string(),
            source,
        },
        StoreError::Unknown { .. } => ProviderError::Store {
            path: path.to_string(),
            source,
        },
    }
}

/// Coarse lifecycle state of a provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Active,
    Closed,
}

const STATE_UNINITIALIZED: u8 = 0;
const STATE_ACTIVE: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Outcome of a conditional configuration write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The write committed; carries the written snapshot paired with the
    /// fresh store-assigned version.
    Committed(LoadedConfig),

    /// Another writer changed the configuration since the guard version was
    /// observed. Reload and retry.
    Conflict,
}

impl StoreOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreOutcome::Conflict)
    }

    /// The committed result, or `None` on conflict.
    pub fn committed(self) -> Option<LoadedConfig> {
        match self {
            StoreOutcome::Committed(loaded) => Some(loaded),
            StoreOutcome::Conflict => None,
        }
    }
}

/// Shared-configuration provider over a [`CoordStore`].
///
/// One instance per process; safe to share across tasks. The store handle is
/// borrowed for the provider's lifetime via `Arc` and never mutated.
pub struct ConfigProvider<S: CoordStore> {
    store: Arc<S>,
    defaults: ConfigSnapshot,
    identity: String,
    config_path: String,
    lock_path: String,
    state: AtomicU8,
}

impl<S: CoordStore> ConfigProvider<S> {
    /// Creates a provider rooted at `base_path`. `defaults` fills in keys the
    /// stored configuration does not carry; `identity` names this process in
    /// payload headers and lock ownership.
    pub fn new(
        store: Arc<S>,
        base_path: &str,
        defaults: ConfigSnapshot,
        identity: impl Into<String>,
    ) -> Self {
        ConfigProvider {
            store,
            defaults,
            identity: identity.into(),
            config_path: make_path(base_path, CONFIG_CHILD),
            lock_path: make_path(base_path, LOCK_CHILD),
            state: AtomicU8::new(STATE_UNINITIALIZED),
        }
    }

    /// Transitions Uninitialized → Active. Exactly-once: a second call, or a
    /// call after `close`, fails with [`ProviderError::AlreadyStarted`].
    pub fn start(&self) -> ProviderResult<()> {
        self.state
            .compare_exchange(
                STATE_UNINITIALIZED,
                STATE_ACTIVE,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| ProviderError::AlreadyStarted)?;
        info!(config_path = %self.config_path, identity = %self.identity, "Provider started");
        Ok(())
    }

    /// Transitions any state → Closed. Idempotent.
    pub fn close(&self) {
        let previous = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if previous != STATE_CLOSED {
            info!(config_path = %self.config_path, "Provider closed");
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ProviderState {
        match self.state.load(Ordering::SeqCst) {
            STATE_ACTIVE => ProviderState::Active,
            STATE_CLOSED => ProviderState::Closed,
            _ => ProviderState::Uninitialized,
        }
    }

    fn ensure_active(&self) -> ProviderResult<()> {
        if self.state.load(Ordering::SeqCst) == STATE_ACTIVE {
            Ok(())
        } else {
            Err(ProviderError::NotActive)
        }
    }

    /// Reads the current shared configuration.
    ///
    /// If the configuration key has never been written, returns the defaults
    /// snapshot at [`Version::ABSENT`]. Otherwise decodes the stored payload,
    /// overlays it on the defaults, and pairs it with the revision the store
    /// reported for this read.
    pub async fn load_config(&self) -> ProviderResult<LoadedConfig> {
        self.ensure_active()?;

        let node = self
            .store
            .get(&self.config_path)
            .await
            .map_err(|e| map_store_err(&self.config_path, e))?;

        match node {
            None => {
                debug!(path = %self.config_path, "No stored configuration, serving defaults");
                Ok(LoadedConfig::new(self.defaults.clone(), Version::ABSENT))
            }
            Some(node) => {
                let stored = codec::decode(&node.value).map_err(|source| ProviderError::Decode {
                    path: self.config_path.clone(),
                    source,
                })?;
                let snapshot = stored.merged_over(&self.defaults);
                debug!(
                    path = %self.config_path,
                    revision = node.mod_revision,
                    entries = snapshot.len(),
                    "Configuration loaded"
                );
                Ok(LoadedConfig::new(
                    snapshot,
                    Version::from_revision(node.mod_revision),
                ))
            }
        }
    }

    /// Conditionally writes `snapshot`, guarded by the version the caller
    /// last observed. [`Version::ABSENT`] asserts create-if-absent.
    ///
    /// On success the returned [`LoadedConfig`] pairs the written snapshot
    /// with the fresh store-assigned version; a caller chaining writes uses it
    /// as the next guard. A conflict means another writer won the race since
    /// `expected` was observed — reload, reapply the change, retry.
    pub async fn store_config(
        &self,
        snapshot: &ConfigSnapshot,
        expected: Version,
    ) -> ProviderResult<StoreOutcome> {
        self.ensure_active()?;

        let payload = codec::encode(snapshot, &self.identity);
        let outcome = self
            .store
            .compare_and_put(&self.config_path, payload, expected.as_revision())
            .await
            .map_err(|e| map_store_err(&self.config_path, e))?;

        match outcome {
            CasOutcome::Committed(revision) => {
                info!(path = %self.config_path, revision, "Configuration stored");
                Ok(StoreOutcome::Committed(LoadedConfig::new(
                    snapshot.clone(),
                    Version::from_revision(revision),
                )))
            }
            CasOutcome::Conflict => {
                debug!(
                    path = %self.config_path,
                    expected = %expected,
                    "Configuration write conflicted, caller must reload"
                );
                Ok(StoreOutcome::Conflict)
            }
        }
    }

    /// Creates a lock handle for `<base>/locks/<name>`, bound to this
    /// provider's identity. Does not acquire.
    pub fn new_pseudo_lock(&self, name: &str) -> ProviderResult<PseudoLock<S>> {
        self.ensure_active()?;
        Ok(PseudoLock::new(
            Arc::clone(&self.store),
            make_path(&self.lock_path, name),
            &self.identity,
        ))
    }

    /// The full path of the configuration key.
    pub fn config_path(&self) -> &str {
        &self.config_path
    }

    /// The root of the lock namespace.
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }
}

/// Joins path segments with exactly one `/` between them.
fn make_path(base: &str, child: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn new_provider() -> ConfigProvider<MemoryStore> {
        ConfigProvider::new(
            Arc::new(MemoryStore::new()),
            "/app",
            ConfigSnapshot::new(),
            "test-node",
        )
    }

    #[test]
    fn test_paths_are_derived_from_base() {
        let provider = new_provider();
        assert_eq!(provider.config_path(), "/app/configs");
        assert_eq!(provider.lock_path(), "/app/locks");

        let trailing = ConfigProvider::new(
            Arc::new(MemoryStore::new()),
            "/app/",
            ConfigSnapshot::new(),
            "test-node",
        );
        assert_eq!(trailing.config_path(), "/app/configs");
    }

    #[test]
    fn test_start_is_exactly_once() {
        let provider = new_provider();
        assert_eq!(provider.state(), ProviderState::Uninitialized);

        provider.start().unwrap();
        assert_eq!(provider.state(), ProviderState::Active);

        let err = provider.start().unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyStarted));
    }

    #[test]
    fn test_concurrent_start_has_one_winner() {
        let provider = Arc::new(new_provider());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                std::thread::spawn(move || provider.start().is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(provider.state(), ProviderState::Active);
    }

    #[test]
    fn test_close_is_idempotent() {
        let provider = new_provider();
        provider.start().unwrap();

        provider.close();
        assert_eq!(provider.state(), ProviderState::Closed);
        provider.close();
        assert_eq!(provider.state(), ProviderState::Closed);

        // start after close is still a lifecycle violation
        assert!(matches!(
            provider.start().unwrap_err(),
            ProviderError::AlreadyStarted
        ));
    }

    #[test]
    fn test_close_before_start() {
        let provider = new_provider();
        provider.close();
        assert_eq!(provider.state(), ProviderState::Closed);
    }

    #[tokio::test]
    async fn test_operations_require_active_state() {
        let provider = new_provider();

        assert!(matches!(
            provider.load_config().await.unwrap_err(),
            ProviderError::NotActive
        ));
        assert!(matches!(
            provider
                .store_config(&ConfigSnapshot::new(), Version::ABSENT)
                .await
                .unwrap_err(),
            ProviderError::NotActive
        ));
        assert!(matches!(
            provider.new_pseudo_lock("maintenance").unwrap_err(),
            ProviderError::NotActive
        ));

        provider.start().unwrap();
        provider.close();
        assert!(matches!(
            provider.load_config().await.unwrap_err(),
            ProviderError::NotActive
        ));
    }

    #[tokio::test]
    async fn test_load_empty_store_serves_defaults() {
        let defaults = ConfigSnapshot::new().with("port", "2379");
        let provider = ConfigProvider::new(
            Arc::new(MemoryStore::new()),
            "/app",
            defaults.clone(),
            "test-node",
        );
        provider.start().unwrap();

        let loaded = provider.load_config().await.unwrap();
        assert_eq!(loaded.version(), Version::ABSENT);
        assert_eq!(loaded.snapshot(), &defaults);
    }

    #[tokio::test]
    async fn test_stored_entries_override_defaults() {
        let defaults = ConfigSnapshot::new().with("port", "2379").with("name", "default");
        let provider = ConfigProvider::new(
            Arc::new(MemoryStore::new()),
            "/app",
            defaults,
            "test-node",
        );
        provider.start().unwrap();

        let update = ConfigSnapshot::new().with("name", "node-1");
        provider
            .store_config(&update, Version::ABSENT)
            .await
            .unwrap();

        let loaded = provider.load_config().await.unwrap();
        assert_eq!(loaded.snapshot().get("name"), Some("node-1"));
        assert_eq!(loaded.snapshot().get("port"), Some("2379"));
    }

    #[tokio::test]
    async fn test_stale_guard_returns_conflict() {
        let provider = new_provider();
        provider.start().unwrap();

        let first = provider
            .store_config(&ConfigSnapshot::new().with("a", "1"), Version::ABSENT)
            .await
            .unwrap();
        assert!(!first.is_conflict());

        let second = provider
            .store_config(&ConfigSnapshot::new().with("a", "2"), Version::ABSENT)
            .await
            .unwrap();
        assert!(second.is_conflict());
        assert_eq!(second.committed(), None);
    }

    #[tokio::test]
    async fn test_unparsable_payload_is_decode_error() {
        let store = Arc::new(MemoryStore::new());
        // Corrupt payload written outside the provider
        store
            .compare_and_put("/app/configs", b"no separator here\n".to_vec(), 0)
            .await
            .unwrap();

        let provider =
            ConfigProvider::new(store, "/app", ConfigSnapshot::new(), "test-node");
        provider.start().unwrap();

        let err = provider.load_config().await.unwrap_err();
        assert!(matches!(err, ProviderError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_outage_maps_to_store_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let provider = ConfigProvider::new(
            Arc::clone(&store),
            "/app",
            ConfigSnapshot::new(),
            "test-node",
        );
        provider.start().unwrap();

        store.set_offline(true);
        let err = provider.load_config().await.unwrap_err();
        assert!(matches!(err, ProviderError::StoreUnavailable { .. }));

        let err = provider
            .store_config(&ConfigSnapshot::new(), Version::ABSENT)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::StoreUnavailable { .. }));
    }
}
