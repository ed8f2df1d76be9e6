//! Cooperative mutual exclusion over the coordination store.
//!
//! A [`PseudoLock`] owns one named path under the provider's lock namespace
//! and acquires it by creating an ephemeral, TTL-bound entry there. At most
//! one holder exists per path at any instant; a holder that crashes without
//! releasing is reclaimed by the store once the TTL lapses, so no deadlock is
//! permanent. Contention is resolved by polling: losers retry the create at a
//! fixed interval until the deadline, then report
//! [`AcquireOutcome::TimedOut`] as an ordinary value.

use crate::provider::{map_store_err, ProviderResult};
use crate::store::CoordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// How often a contended acquire re-attempts the ephemeral create.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default TTL on the lock entry. Long enough to cover a maintenance critical
/// section, short enough that a crashed holder does not wedge the fleet.
const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Outcome of an acquire attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// This handle is now the holder.
    Acquired,

    /// Another holder kept the lock for the whole timeout. Expected for a
    /// busy lock; try again later.
    TimedOut,
}

impl AcquireOutcome {
    pub fn is_acquired(self) -> bool {
        self == AcquireOutcome::Acquired
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LockState {
    Unheld,
    Acquiring,
    Held,
}

/// An exclusively owned handle on one named lock path.
///
/// The handle must not be shared or duplicated: ownership of the underlying
/// entry is tied to this handle's unique owner identity, so methods take
/// `&mut self` and the type is deliberately not `Clone`.
#[derive(Debug)]
pub struct PseudoLock<S: CoordStore> {
    store: Arc<S>,
    path: String,
    owner: String,
    ttl: Duration,
    state: LockState,
}

impl<S: CoordStore> PseudoLock<S> {
    pub(crate) fn new(store: Arc<S>, path: String, identity: &str) -> Self {
        // The random suffix makes the owner identity unique per handle, so an
        // owner-guarded delete can never remove a successor's entry.
        let owner = format!("{}-{}", identity, Uuid::new_v4());
        PseudoLock {
            store,
            path,
            owner,
            ttl: DEFAULT_TTL,
            state: LockState::Unheld,
        }
    }

    /// Overrides the TTL the store applies to this lock's entry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// The full path of the lock entry.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// This handle's unique owner identity.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether this handle currently believes it holds the lock. The store
    /// may have reclaimed the entry asynchronously if the TTL lapsed.
    pub fn is_held(&self) -> bool {
        self.state == LockState::Held
    }

    /// Attempts to become the holder, retrying until `timeout` elapses.
    ///
    /// Returns [`AcquireOutcome::TimedOut`] if another holder kept the lock
    /// the whole time. Calling acquire on an already-held handle re-issues
    /// the create, which renews the entry's TTL; if the store has already
    /// reclaimed the entry, the handle contends for it again like any other
    /// waiter.
    pub async fn acquire(&mut self, timeout: Duration) -> ProviderResult<AcquireOutcome> {
        self.state = LockState::Acquiring;
        let deadline = Instant::now() + timeout;

        loop {
            let created = match self
                .store
                .create_ephemeral(&self.path, &self.owner, self.ttl)
                .await
            {
                Ok(created) => created,
                Err(err) => {
                    self.state = LockState::Unheld;
                    return Err(map_store_err(&self.path, err));
                }
            };

            if created {
                self.state = LockState::Held;
                debug!(path = %self.path, owner = %self.owner, "Lock acquired");
                return Ok(AcquireOutcome::Acquired);
            }

            let now = Instant::now();
            if now >= deadline {
                self.state = LockState::Unheld;
                debug!(path = %self.path, owner = %self.owner, "Lock acquire timed out");
                return Ok(AcquireOutcome::TimedOut);
            }

            tokio::time::sleep(RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Relinquishes the lock if held. Idempotent; a handle that never
    /// acquired, or already released, is a no-op.
    pub async fn release(&mut self) -> ProviderResult<()> {
        if self.state != LockState::Held {
            return Ok(());
        }

        self.store
            .delete_if_owner(&self.path, &self.owner)
            .await
            .map_err(|err| map_store_err(&self.path, err))?;

        self.state = LockState::Unheld;
        debug!(path = %self.path, owner = %self.owner, "Lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn new_lock(store: &Arc<MemoryStore>) -> PseudoLock<MemoryStore> {
        PseudoLock::new(Arc::clone(store), "/app/locks/maintenance".to_string(), "test-node")
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = new_lock(&store);

        assert!(!lock.is_held());
        let outcome = lock.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(outcome.is_acquired());
        assert!(lock.is_held());

        lock.release().await.unwrap();
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_acquire_while_held_succeeds_without_waiting() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = new_lock(&store);

        lock.acquire(Duration::from_secs(1)).await.unwrap();

        // Same-owner create succeeds on the first attempt, so even a zero
        // timeout acquires
        let again = lock.acquire(Duration::ZERO).await.unwrap();
        assert!(again.is_acquired());
        assert!(lock.is_held());
    }

    #[tokio::test]
    async fn test_reacquire_renews_the_ttl() {
        let store = Arc::new(MemoryStore::new());
        let mut holder = new_lock(&store).with_ttl(Duration::from_secs(1));
        let mut contender = new_lock(&store);

        holder.acquire(Duration::from_secs(1)).await.unwrap();

        // Past the halfway point of the TTL, re-acquire pushes the expiry out
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(holder.acquire(Duration::ZERO).await.unwrap().is_acquired());

        // The original TTL has now lapsed; only the renewal keeps the
        // contender out
        tokio::time::sleep(Duration::from_millis(600)).await;
        let outcome = contender.acquire(Duration::ZERO).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::TimedOut);
        assert!(holder.is_held());
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let store = Arc::new(MemoryStore::new());
        let mut holder = new_lock(&store);
        let mut waiter = new_lock(&store);

        holder.acquire(Duration::from_secs(1)).await.unwrap();

        let outcome = waiter.acquire(Duration::from_millis(250)).await.unwrap();
        assert_eq!(outcome, AcquireOutcome::TimedOut);
        assert!(!waiter.is_held());
    }

    #[tokio::test]
    async fn test_waiter_succeeds_after_release() {
        let store = Arc::new(MemoryStore::new());
        let mut holder = new_lock(&store);
        let mut waiter = new_lock(&store);

        holder.acquire(Duration::from_secs(1)).await.unwrap();

        let waiter_task = tokio::spawn(async move {
            let outcome = waiter.acquire(Duration::from_secs(5)).await.unwrap();
            assert!(outcome.is_acquired());
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        holder.release().await.unwrap();
        waiter_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = new_lock(&store);

        // Never held: no-op
        lock.release().await.unwrap();

        lock.acquire(Duration::from_secs(1)).await.unwrap();
        lock.release().await.unwrap();
        lock.release().await.unwrap();
        assert!(!lock.is_held());
    }

    #[tokio::test]
    async fn test_session_loss_frees_the_lock() {
        let store = Arc::new(MemoryStore::new());
        let mut crashed = new_lock(&store);
        let mut successor = new_lock(&store);

        crashed.acquire(Duration::from_secs(1)).await.unwrap();

        // Holder's process dies; the store reclaims its session
        let owner = crashed.owner().to_string();
        drop(crashed);
        store.expire_session(&owner);

        let outcome = successor.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(outcome.is_acquired());
    }

    #[tokio::test]
    async fn test_ttl_expiry_frees_the_lock() {
        let store = Arc::new(MemoryStore::new());
        let mut stale = new_lock(&store).with_ttl(Duration::from_millis(100));
        let mut successor = new_lock(&store);

        stale.acquire(Duration::from_secs(1)).await.unwrap();

        // No release: the TTL alone must reclaim the path
        let outcome = successor.acquire(Duration::from_secs(2)).await.unwrap();
        assert!(outcome.is_acquired());
    }

    #[tokio::test]
    async fn test_acquire_surfaces_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let mut lock = new_lock(&store);

        store.set_offline(true);
        let err = lock.acquire(Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(
            err,
            crate::provider::ProviderError::StoreUnavailable { .. }
        ));
        assert!(!lock.is_held());
    }
}
