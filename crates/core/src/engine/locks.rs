//! Per-instance mutual exclusion.
//!
//! Serialises "record decision, aggregate, advance" for one instance within
//! a process. Entries are removed from the map once nobody holds or waits
//! on them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::DbId;

type LockMap = Arc<Mutex<HashMap<DbId, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct InstanceLocks {
    locks: LockMap,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance_id`.
    pub async fn lock(&self, instance_id: DbId) -> InstanceGuard {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(map.entry(instance_id).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        InstanceGuard {
            instance_id,
            locks: Arc::clone(&self.locks),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of instances with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held while an instance is being mutated.
#[derive(Debug)]
pub struct InstanceGuard {
    instance_id: DbId,
    locks: LockMap,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.instance_id);
        }
    }
}
