//! Pending operation registry.
//!
//! Holds at most one outstanding operation per origin key. Submissions may
//! arrive from any number of request handlers while the reconciliation loop
//! works from snapshots, so the lock is only ever held for map mutation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

use crate::types::{OriginKey, PendingOperation};

/// Thread-safe registry of pending operations.
#[derive(Debug, Clone, Default)]
pub struct PendingRegistry {
    ops: Arc<Mutex<HashMap<OriginKey, PendingOperation>>>,
}

impl PendingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<OriginKey, PendingOperation>> {
        // Map mutations cannot leave it half-updated, so a poisoned lock is still usable.
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `op`, replacing any operation pending for the same key.
    ///
    /// Returns the replaced operation. It is dropped without side effects.
    pub fn submit(&self, op: PendingOperation) -> Option<PendingOperation> {
        let key = op.origin_key.clone();
        let replaced = self.guard().insert(key.clone(), op);
        if let Some(old) = &replaced {
            debug!(key = %key, replaced = %old.id, "Replaced pending operation");
        }
        replaced
    }

    /// Copy of every pending operation.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingOperation> {
        self.guard().values().cloned().collect()
    }

    /// Remove the operation for `key` if it is still generation `id`.
    ///
    /// Returns `false` when the entry is gone or has been replaced.
    pub fn remove(&self, key: &OriginKey, id: Uuid) -> bool {
        let mut ops = self.guard();
        match ops.get(key) {
            Some(op) if op.id == id => {
                ops.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Whether generation `id` is still the live operation for `key`.
    #[must_use]
    pub fn is_current(&self, key: &OriginKey, id: Uuid) -> bool {
        self.guard().get(key).is_some_and(|op| op.id == id)
    }

    /// Record that the broadened search ran for generation `id`.
    pub fn mark_fallback_attempted(&self, key: &OriginKey, id: Uuid, candidates: usize) -> bool {
        let mut ops = self.guard();
        match ops.get_mut(key) {
            Some(op) if op.id == id => {
                op.fallback_attempted = true;
                op.fallback_candidates = Some(candidates);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn get(&self, key: &OriginKey) -> Option<PendingOperation> {
        self.guard().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Destination;

    fn op(device: &str, command: &str, device_id: &str) -> PendingOperation {
        PendingOperation::new(
            OriginKey::new(device, command),
            Destination::DeviceRecord {
                device_id: device_id.to_string(),
            },
        )
    }

    #[test]
    fn test_submit_replaces_same_key() {
        let registry = PendingRegistry::new();
        let first = op("tv", "power", "d1");
        let second = op("tv", "power", "d2");
        let second_id = second.id;

        assert!(registry.submit(first.clone()).is_none());
        let replaced = registry.submit(second).unwrap();
        assert_eq!(replaced.id, first.id);

        assert_eq!(registry.len(), 1);
        let live = registry.get(&OriginKey::new("tv", "power")).unwrap();
        assert_eq!(live.id, second_id);
        assert_eq!(
            live.destination,
            Destination::DeviceRecord {
                device_id: "d2".to_string()
            }
        );
    }

    #[test]
    fn test_remove_ignores_replaced_generation() {
        let registry = PendingRegistry::new();
        let first = op("tv", "power", "d1");
        let first_id = first.id;
        registry.submit(first);
        let second = op("tv", "power", "d2");
        let second_id = second.id;
        registry.submit(second);

        let key = OriginKey::new("tv", "power");
        assert!(!registry.remove(&key, first_id));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&key, second_id));
        assert!(registry.is_empty());
        assert!(!registry.remove(&key, second_id));
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = PendingRegistry::new();
        registry.submit(op("tv", "power", "d1"));
        registry.submit(op("tv", "mute", "d1"));

        let snapshot = registry.snapshot();
        registry.submit(op("amp", "power", "d2"));

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_mark_fallback_attempted() {
        let registry = PendingRegistry::new();
        let pending = op("tv", "power", "d1");
        let id = pending.id;
        registry.submit(pending);

        let key = OriginKey::new("tv", "power");
        assert!(registry.mark_fallback_attempted(&key, id, 2));
        let live = registry.get(&key).unwrap();
        assert!(live.fallback_attempted);
        assert_eq!(live.fallback_candidates, Some(2));
        assert!(!registry.mark_fallback_attempted(&key, Uuid::new_v4(), 1));
    }

    #[test]
    fn test_concurrent_submissions_keep_one_entry_per_key() {
        let registry = PendingRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.submit(op("tv", &format!("cmd{}", j % 5), &format!("d{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 5);
    }
}
