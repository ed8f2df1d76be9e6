//! Backing-store abstraction for the configuration core.
//!
//! The provider and pseudo-lock never talk to a concrete coordination service
//! directly. Everything they need is captured by the [`CoordStore`] trait:
//!
//! 1. **Linearizable reads** returning the store-assigned modification revision
//! 2. **Revision-guarded compare-and-put** on a single key
//! 3. **Ephemeral create** with a TTL the store reclaims on session loss
//! 4. **Owner-guarded delete** so a stale holder can never remove a
//!    successor's lock node
//!
//! Store-specific failure codes are translated into [`StoreError`] at the
//! adapter boundary; nothing above this module inspects native codes. A CAS
//! rejection is not a failure at all — it is the [`CasOutcome::Conflict`]
//! value, so callers cannot confuse an expected race with a broken store.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Backing-store errors, after boundary translation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Unrecognized store failure (code {code}): {message}")]
    Unknown { code: i32, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A value read from the store together with its revision metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreNode {
    /// The stored payload
    pub value: Vec<u8>,

    /// The revision at which this key was last written (store-assigned,
    /// monotonically increasing per write)
    pub mod_revision: i64,
}

/// Outcome of a revision-guarded conditional write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write committed; the key now sits at this revision.
    Committed(i64),

    /// The key's current revision did not match the guard. Expected under
    /// concurrent writers; the caller reloads and retries.
    Conflict,
}

/// The capability seam over a strongly-consistent coordination service.
///
/// Implementations must provide linearizable get/put on a path namespace and
/// must reclaim ephemeral entries once their TTL lapses without renewal, even
/// if the owning process never returns. That reclamation is the liveness
/// property the pseudo-lock leans on.
#[async_trait]
pub trait CoordStore: Send + Sync {
    /// Reads the current value and revision of `path`, or `None` if the key
    /// has never been written.
    async fn get(&self, path: &str) -> StoreResult<Option<StoreNode>>;

    /// Writes `value` to `path` only if the key's current modification
    /// revision equals `expected_revision`. An `expected_revision` of zero
    /// asserts the key does not exist yet.
    async fn compare_and_put(
        &self,
        path: &str,
        value: Vec<u8>,
        expected_revision: i64,
    ) -> StoreResult<CasOutcome>;

    /// Creates an ephemeral entry at `path` owned by `owner`, expiring after
    /// `ttl` unless renewed by re-creation. Returns `false` if a live entry
    /// already occupies the path.
    async fn create_ephemeral(&self, path: &str, owner: &str, ttl: Duration)
        -> StoreResult<bool>;

    /// Deletes the ephemeral entry at `path` if and only if it is owned by
    /// `owner`. A missing entry or a different owner is a no-op.
    async fn delete_if_owner(&self, path: &str, owner: &str) -> StoreResult<()>;
}
