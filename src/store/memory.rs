//! In-process implementation of [`CoordStore`].
//!
//! `MemoryStore` backs tests and single-process hosts with the same semantics
//! a real coordination service provides:
//!
//! - A global revision counter that increments on every committed write
//! - Lazy TTL expiry: ephemeral entries are purged on access rather than by a
//!   background scanner
//! - An explicit session-expiry hook so tests can model a holder crashing
//!   before it releases
//! - An outage toggle that makes every call fail with
//!   [`StoreError::Unavailable`], for exercising the retryable error path

use crate::store::{CasOutcome, CoordStore, StoreError, StoreNode, StoreResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// An ephemeral entry held by one owner until released or expired.
#[derive(Clone, Debug)]
struct Ephemeral {
    owner: String,
    expires_at: Instant,
}

impl Ephemeral {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// An in-memory coordination store with etcd-style revision semantics.
#[derive(Debug)]
pub struct MemoryStore {
    /// Durable key-value entries, keyed by path
    entries: RwLock<HashMap<String, StoreNode>>,

    /// Ephemeral entries, keyed by path
    ephemerals: DashMap<String, Ephemeral>,

    /// Current global revision (monotonically increasing)
    revision: AtomicI64,

    /// When set, every call fails with `Unavailable`
    offline: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store at revision zero.
    pub fn new() -> Self {
        MemoryStore {
            entries: RwLock::new(HashMap::new()),
            ephemerals: DashMap::new(),
            revision: AtomicI64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Gets the current global revision.
    pub fn current_revision(&self) -> i64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Simulates a store outage. While offline, every call fails with
    /// [`StoreError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drops every ephemeral entry held by `owner`, as the store itself would
    /// after the owner's session lapses. Test hook for modeling process loss.
    pub fn expire_session(&self, owner: &str) {
        self.ephemerals.retain(|path, entry| {
            if entry.owner == owner {
                debug!(path = %path, owner = %owner, "Session expired, reclaiming ephemeral entry");
                false
            } else {
                true
            }
        });
    }

    /// Increments and returns the next revision.
    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn check_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    /// Purges ephemeral entries whose TTL has lapsed.
    fn purge_expired(&self) {
        self.ephemerals.retain(|path, entry| {
            if entry.is_expired() {
                debug!(path = %path, owner = %entry.owner, "TTL lapsed, reclaiming ephemeral entry");
                false
            } else {
                true
            }
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn get(&self, path: &str) -> StoreResult<Option<StoreNode>> {
        self.check_online()?;
        Ok(self.entries.read().get(path).cloned())
    }

    async fn compare_and_put(
        &self,
        path: &str,
        value: Vec<u8>,
        expected_revision: i64,
    ) -> StoreResult<CasOutcome> {
        self.check_online()?;

        // The write lock makes the compare-then-write pair atomic, which is
        // what gives the CAS its linearizable single-winner guarantee.
        let mut entries = self.entries.write();
        let current = entries.get(path).map(|node| node.mod_revision).unwrap_or(0);

        if current != expected_revision {
            debug!(
                path = %path,
                expected = expected_revision,
                current,
                "Conditional write rejected"
            );
            return Ok(CasOutcome::Conflict);
        }

        let new_revision = self.next_revision();
        entries.insert(
            path.to_string(),
            StoreNode {
                value,
                mod_revision: new_revision,
            },
        );

        debug!(path = %path, revision = new_revision, "Conditional write committed");
        Ok(CasOutcome::Committed(new_revision))
    }

    async fn create_ephemeral(
        &self,
        path: &str,
        owner: &str,
        ttl: Duration,
    ) -> StoreResult<bool> {
        self.check_online()?;
        self.purge_expired();

        match self.ephemerals.entry(path.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().owner == owner || occupied.get().is_expired() {
                    // Re-creation by the current owner renews the TTL
                    occupied.insert(Ephemeral {
                        owner: owner.to_string(),
                        expires_at: Instant::now() + ttl,
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Ephemeral {
                    owner: owner.to_string(),
                    expires_at: Instant::now() + ttl,
                });
                debug!(path = %path, owner = %owner, "Ephemeral entry created");
                Ok(true)
            }
        }
    }

    async fn delete_if_owner(&self, path: &str, owner: &str) -> StoreResult<()> {
        self.check_online()?;
        let removed = self
            .ephemerals
            .remove_if(path, |_, entry| entry.owner == owner);
        if removed.is_some() {
            debug!(path = %path, owner = %owner, "Ephemeral entry deleted");
        }
        Ok(())
    }
}
