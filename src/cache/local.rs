//! In-process LRU tier.
//!
//! A plain `HashMap` plus an access-order `VecDeque`, guarded by
//! `parking_lot::RwLock` (faster than an async-aware lock for critical
//! sections this short). Eviction is batch-driven: once the cap is
//! exceeded, the `items_to_prune` least-recently-used entries are dropped
//! in one pass rather than one at a time.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub full_key: String,
    pub value: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub local_ttl: Duration,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now - self.created_at;
        age.to_std().unwrap_or(Duration::ZERO) > self.local_ttl
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

pub struct LocalCache {
    inner: RwLock<Inner>,
    max_items: usize,
    items_to_prune: usize,
}

impl LocalCache {
    pub fn new(max_items: usize, items_to_prune: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_items,
            items_to_prune: items_to_prune.max(1),
        }
    }

    /// Returns the entry if present and not expired. A hit touches the
    /// access order so the entry is least likely to be pruned next.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Utc::now();
        {
            let inner = self.inner.read();
            match inner.entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {}
                _ => return None,
            }
        }
        let mut inner = self.inner.write();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            return None;
        }
        touch(&mut inner.order, key);
        inner.entries.get_mut(key).map(|e| {
            e.hit_count += 1;
            e.value.clone()
        })
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut inner = self.inner.write();
        let entry = CacheEntry {
            full_key: key.to_string(),
            value,
            created_at: Utc::now(),
            local_ttl: ttl,
            hit_count: 0,
        };
        let is_new = inner.entries.insert(key.to_string(), entry).is_none();
        if is_new {
            inner.order.push_back(key.to_string());
        } else {
            touch(&mut inner.order, key);
        }

        if inner.entries.len() > self.max_items {
            let to_prune = self.items_to_prune.min(inner.entries.len());
            for _ in 0..to_prune {
                if let Some(victim) = inner.order.pop_front() {
                    inner.entries.remove(&victim);
                } else {
                    break;
                }
            }
        }
    }

    pub fn delete(&self, key: &str) {
        let mut inner = self.inner.write();
        inner.entries.remove(key);
        inner.order.retain(|k| k != key);
    }

    /// Deletes every key with the given prefix. Unlike the distributed
    /// tier, the local tier owns its key space outright, so a true
    /// prefix scan is cheap and exact (no epoch stamping needed here).
    pub fn invalidate_prefix(&self, prefix: &str) {
        let mut inner = self.inner.write();
        let victims: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in victims {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }
}

fn touch(order: &mut VecDeque<String>, key: &str) {
    if let Some(pos) = order.iter().position(|k| k == key) {
        order.remove(pos);
    }
    order.push_back(key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotence_within_ttl() {
        let cache = LocalCache::new(100, 10);
        cache.set("a", b"v1".to_vec(), Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(b"v1".to_vec()));
    }

    #[test]
    fn prefix_isolation() {
        let cache = LocalCache::new(100, 10);
        cache.set("search:a", b"1".to_vec(), Duration::from_secs(60));
        cache.set("crypto:b", b"2".to_vec(), Duration::from_secs(60));
        cache.invalidate_prefix("search:");
        assert_eq!(cache.get("search:a"), None);
        assert_eq!(cache.get("crypto:b"), Some(b"2".to_vec()));
    }

    #[test]
    fn expired_entries_are_absent() {
        let cache = LocalCache::new(100, 10);
        cache.set("a", b"v1".to_vec(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn cap_plus_one_prunes_a_batch() {
        let cache = LocalCache::new(10, 3);
        for i in 0..10 {
            cache.set(&format!("k{i}"), vec![0], Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 10);
        cache.set("k10", vec![0], Duration::from_secs(60));
        // 11 inserted, over cap by 1 triggers a prune of 3 -> 8 remain.
        assert_eq!(cache.len(), 8);
        // The oldest (least-recently-used) keys are the ones pruned.
        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k1"), None);
        assert_eq!(cache.get("k2"), None);
        assert_eq!(cache.get("k3"), Some(vec![0]));
    }

    #[test]
    fn touching_an_entry_protects_it_from_the_next_prune() {
        let cache = LocalCache::new(4, 2);
        cache.set("a", vec![0], Duration::from_secs(60));
        cache.set("b", vec![0], Duration::from_secs(60));
        cache.set("c", vec![0], Duration::from_secs(60));
        cache.set("d", vec![0], Duration::from_secs(60));
        // touch "a" so it's no longer the least-recently-used
        let _ = cache.get("a");
        cache.set("e", vec![0], Duration::from_secs(60));
        assert_eq!(cache.get("a"), Some(vec![0]));
    }
}
