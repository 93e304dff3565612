use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per entity key.
///
/// Check-then-write sequences on the same entity serialize; different
/// entities never contend. Idle slots are dropped on the next `lock` call.
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks entities with an external call in progress.
///
/// Unlike [`KeyedLocks`] this is not held across the call to wait on; a second
/// claimant is turned away instead of queued.
pub struct InFlight<K: Eq + Hash> {
    keys: Arc<std::sync::Mutex<HashSet<K>>>,
}

/// Releases its key when dropped.
pub struct Claim<K: Eq + Hash> {
    keys: Arc<std::sync::Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self {
            keys: Arc::new(std::sync::Mutex::new(HashSet::new())),
        }
    }

    pub fn claim(&self, key: &K) -> Option<Claim<K>> {
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if keys.insert(key.clone()) {
            Some(Claim {
                keys: Arc::clone(&self.keys),
                key: key.clone(),
            })
        } else {
            None
        }
    }
}

impl<K: Eq + Hash + Clone> Default for InFlight<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for Claim<K> {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        keys.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let inside = Arc::clone(&inside);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(&1).await;
                assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<u32>::new();
        let _first = locks.lock(&1).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(&2)).await;
        assert!(second.is_ok());
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let in_flight = InFlight::<u32>::new();
        let claim = in_flight.claim(&7);
        assert!(claim.is_some());
        assert!(in_flight.claim(&7).is_none());
        drop(claim);
        assert!(in_flight.claim(&7).is_some());
    }
}
