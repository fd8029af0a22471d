//! Per-instance serialization
//!
//! Applies and scans of the same instance never overlap; different
//! instances proceed independently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per instance, created on first use
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `instance`
    pub async fn lock(&self, instance: &str) -> OwnedMutexGuard<()> {
        let mutex = Arc::clone(
            self.locks
                .entry(instance.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        mutex.lock_owned().await
    }

    /// Exclusive access if nobody holds `instance` right now
    #[must_use]
    pub fn try_lock(&self, instance: &str) -> Option<OwnedMutexGuard<()>> {
        let mutex = Arc::clone(
            self.locks
                .entry(instance.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        mutex.try_lock_owned().ok()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_instance_serializes() {
        let locks = InstanceLocks::new();
        let guard = locks.lock("lobby").await;
        assert!(locks.try_lock("lobby").is_none());
        assert!(locks.try_lock("survival").is_some());
        drop(guard);
        assert!(locks.try_lock("lobby").is_some());
        assert_eq!(locks.len(), 2);
    }
}
