//! Deadline enforcement for store calls.
//!
//! The gate sits on the hot path of every request, so a slow store must
//! surface as [`StoreError::Timeout`] instead of stalling the request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;

use crate::store::{CounterStore, StoreError, StoreResult};

/// Wraps another store and bounds every call with a timeout.
pub struct TimedStore<S> {
    inner: S,
    deadline: Duration,
}

impl<S: CounterStore> TimedStore<S> {
    pub fn new(inner: S, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StoreResult<T>> + Send,
    ) -> StoreResult<T> {
        match time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                op,
                millis: self.deadline.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl<S: CounterStore> CounterStore for TimedStore<S> {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.bounded("get", self.inner.get(key)).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.bounded("set_with_ttl", self.inner.set_with_ttl(key, value, ttl_secs))
            .await
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> StoreResult<i64> {
        self.bounded("increment", self.inner.increment(key, ttl_secs))
            .await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.bounded("exists", self.inner.exists(key)).await
    }

    async fn ttl_secs(&self, key: &str) -> StoreResult<Option<u64>> {
        self.bounded("ttl_secs", self.inner.ttl_secs(key)).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.bounded("delete", self.inner.delete(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    struct StalledStore;

    #[async_trait]
    impl CounterStore for StalledStore {
        async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
            time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: u64) -> StoreResult<()> {
            Ok(())
        }
        async fn increment(&self, _key: &str, _ttl: u64) -> StoreResult<i64> {
            Ok(1)
        }
        async fn exists(&self, _key: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn ttl_secs(&self, _key: &str) -> StoreResult<Option<u64>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let store = TimedStore::new(StalledStore, Duration::from_millis(20));
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { op: "get", millis: 20 }));
        assert_eq!(store.increment("k", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_passes_through_fast_calls() {
        let store = TimedStore::new(MemoryStore::default(), Duration::from_millis(50));
        store.set_with_ttl("k", "v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
