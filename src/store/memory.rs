//! In-process store backed by a concurrent map.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::{SharedClock, SystemClock};
use crate::store::{CounterStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: u64,
}

impl Slot {
    fn is_live(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// A thread-safe TTL store.
///
/// Expired entries are invisible to readers and are physically removed by
/// [`MemoryStore::purge_expired`].
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, Slot>>,
    clock: SharedClock,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            clock,
        }
    }

    fn expiry(&self, ttl_secs: u64) -> u64 {
        self.clock
            .now_millis()
            .saturating_add(ttl_secs.saturating_mul(1000))
    }

    fn live(&self, key: &str) -> Option<Slot> {
        let now = self.clock.now_millis();
        self.inner
            .get(key)
            .map(|r| r.value().clone())
            .filter(|slot| slot.is_live(now))
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.inner.len();
        self.inner.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.inner.len())
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.live(key).map(|slot| slot.value))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let slot = Slot {
            value: value.to_string(),
            expires_at: self.expiry(ttl_secs),
        };
        self.inner.insert(key.to_string(), slot);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> StoreResult<i64> {
        let now = self.clock.now_millis();
        let fresh = || Slot {
            value: "1".to_string(),
            expires_at: self.expiry(ttl_secs),
        };

        // The entry guard holds the shard lock for the whole read-modify-write.
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if !slot.is_live(now) {
                    *slot = fresh();
                    return Ok(1);
                }
                let current: i64 = slot.value.parse().map_err(|_| StoreError::Corrupt {
                    key: key.to_string(),
                })?;
                let next = current.saturating_add(1);
                slot.value = next.to_string();
                Ok(next)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh());
                Ok(1)
            }
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.live(key).is_some())
    }

    async fn ttl_secs(&self, key: &str) -> StoreResult<Option<u64>> {
        let now = self.clock.now_millis();
        Ok(self
            .live(key)
            .map(|slot| slot.expires_at.saturating_sub(now).div_ceil(1000)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key);
        Ok(())
    }
}
