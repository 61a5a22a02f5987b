//! Keyed async locks for assignment operations.
//!
//! Operations lock in two phases. The kid's lock comes first, alone; only
//! then are the vehicle, team and instructor locks taken, sorted by key.
//! Kid locks are never taken in the second phase, so the fixed order holds
//! across every pair of operations and no two of them can deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{ActorId, GroupId, MemberId, ResourceId};

/// What a lock protects. Ordering is the global lock order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LockKey {
    Member(MemberId),
    Resource(ResourceId),
    Group(GroupId),
    Instructor(ActorId),
}

/// A held lock. Dropping it releases the mutex and forgets the key once
/// nobody else holds or awaits it.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Clones are only handed out under the shard lock `remove_if` holds,
        // so a count of one means no holder and no waiter.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Guards held until dropped.
pub struct LockSet {
    _guards: Vec<KeyGuard>,
}

#[derive(Default)]
pub struct LockRegistry {
    locks: Arc<DashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &LockKey) -> Arc<Mutex<()>> {
        // The map entry guard is released at the end of this statement,
        // before anyone awaits the mutex.
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn lock(&self, key: LockKey) -> KeyGuard {
        let guard = self.handle(&key).lock_owned().await;
        KeyGuard {
            guard: Some(guard),
            key,
            locks: self.locks.clone(),
        }
    }

    /// Lock every key in global order, skipping duplicates.
    pub async fn lock_all(&self, keys: impl IntoIterator<Item = LockKey>) -> LockSet {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        LockSet { _guards: guards }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
