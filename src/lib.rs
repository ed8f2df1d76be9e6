//! # confsync: shared versioned configuration over a coordination store
//!
//! confsync lets a fleet of independent processes agree on one authoritative
//! configuration snapshot held in a strongly-consistent key-value coordination
//! service, and coordinate exclusive access to critical sections without a
//! dedicated lock server. It provides:
//!
//! - **Optimistic concurrency control**: every write to the shared
//!   configuration is guarded by the store-assigned modification revision the
//!   writer last observed; a stale write is rejected, never silently applied
//! - **Pluggable backing store**: the [`CoordStore`] trait captures the few
//!   primitives the core needs (linearizable get, revision-guarded
//!   compare-and-put, ephemeral create with TTL, owner-guarded delete)
//! - **Pseudo-locks**: cooperative mutual exclusion emulated on top of the
//!   store's ephemeral/TTL primitives, with timeout as an ordinary outcome
//! - **Lifecycle gating**: an atomic uninitialized/active/closed state machine
//!   making `start` observably exactly-once under concurrent callers
//!
//! # Usage
//!
//! ```
//! use confsync::{ConfigProvider, ConfigSnapshot, MemoryStore, StoreOutcome, Version};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), confsync::ProviderError> {
//! let store = Arc::new(MemoryStore::new());
//! let provider = ConfigProvider::new(store, "/cluster", ConfigSnapshot::new(), "node-1");
//! provider.start()?;
//!
//! let loaded = provider.load_config().await?;
//! let updated = loaded.snapshot().with("replicas", "3");
//! match provider.store_config(&updated, loaded.version()).await? {
//!     StoreOutcome::Committed(fresh) => assert!(fresh.version() > Version::ABSENT),
//!     StoreOutcome::Conflict => { /* reload and retry */ }
//! }
//! provider.close();
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod config;
pub mod lock;
pub mod provider;
pub mod store;

// Re-export main types at crate root for convenience
pub use config::{ConfigSnapshot, LoadedConfig, Version};
pub use lock::{AcquireOutcome, PseudoLock};
pub use provider::{ConfigProvider, ProviderError, ProviderResult, StoreOutcome};
pub use store::{CasOutcome, CoordStore, MemoryStore, StoreError, StoreNode, StoreResult};
