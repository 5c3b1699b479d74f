//! Per-operation time budget for any [`KvStore`].
//!
//! A timed-out operation fails with [`StorageError::Timeout`] and is never
//! retried here; the caller decides whether the next cycle tries again.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StorageError;
use crate::storage_traits::*;

/// Wraps a store so every call is bounded by `limit`.
#[derive(Debug)]
pub struct TimeoutStore<S> {
    inner: S,
    limit: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = StorageResult<T>>,
    ) -> StorageResult<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                let limit_ms = self.limit.as_millis() as u64;
                warn!(op, limit_ms, "store operation timed out");
                Err(StorageError::Timeout { op, limit_ms })
            }
        }
    }
}

#[async_trait]
impl<S: KvStore> KvStore for TimeoutStore<S> {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        self.bounded("hset", self.inner.hset(key, fields)).await
    }

    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.bounded("hgetall", self.inner.hgetall(key)).await
    }

    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.bounded("hexists", self.inner.hexists(key, field)).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        self.bounded("zadd", self.inner.zadd(key, member, score)).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.bounded("zrem", self.inner.zrem(key, member)).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StorageResult<u64> {
        self.bounded(
            "zrem_range_by_score",
            self.inner.zrem_range_by_score(key, min, max),
        )
        .await
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RankOrder,
    ) -> StorageResult<Vec<ScoredMember>> {
        self.bounded("zrange", self.inner.zrange(key, start, stop, order))
            .await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StorageResult<Vec<ScoredMember>> {
        self.bounded("zrange_by_score", self.inner.zrange_by_score(key, min, max))
            .await
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        self.bounded("zcard", self.inner.zcard(key)).await
    }

    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        self.bounded("zscore", self.inner.zscore(key, member)).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        self.bounded("rpush", self.inner.rpush(key, values)).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        self.bounded("lrange", self.inner.lrange(key, start, stop))
            .await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.bounded("exists", self.inner.exists(key)).await
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        self.bounded("del", self.inner.del(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.bounded("expire", self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> StorageResult<Option<Duration>> {
        self.bounded("ttl", self.inner.ttl(key)).await
    }

    async fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        self.bounded("apply", self.inner.apply(batch)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryKvStore;

    /// A store whose reads never finish.
    struct StalledStore;

    #[async_trait]
    impl KvStore for StalledStore {
        async fn hset(&self, _: &str, _: &[(String, String)]) -> StorageResult<()> {
            std::future::pending().await
        }
        async fn hgetall(&self, _: &str) -> StorageResult<BTreeMap<String, String>> {
            std::future::pending().await
        }
        async fn hexists(&self, _: &str, _: &str) -> StorageResult<bool> {
            std::future::pending().await
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> StorageResult<()> {
            std::future::pending().await
        }
        async fn zrem(&self, _: &str, _: &str) -> StorageResult<bool> {
            std::future::pending().await
        }
        async fn zrem_range_by_score(&self, _: &str, _: f64, _: f64) -> StorageResult<u64> {
            std::future::pending().await
        }
        async fn zrange(
            &self,
            _: &str,
            _: i64,
            _: i64,
            _: RankOrder,
        ) -> StorageResult<Vec<ScoredMember>> {
            std::future::pending().await
        }
        async fn zrange_by_score(
            &self,
            _: &str,
            _: f64,
            _: f64,
        ) -> StorageResult<Vec<ScoredMember>> {
            std::future::pending().await
        }
        async fn zcard(&self, _: &str) -> StorageResult<u64> {
            std::future::pending().await
        }
        async fn zscore(&self, _: &str, _: &str) -> StorageResult<Option<f64>> {
            std::future::pending().await
        }
        async fn rpush(&self, _: &str, _: &[String]) -> StorageResult<u64> {
            std::future::pending().await
        }
        async fn lrange(&self, _: &str, _: i64, _: i64) -> StorageResult<Vec<String>> {
            std::future::pending().await
        }
        async fn exists(&self, _: &str) -> StorageResult<bool> {
            std::future::pending().await
        }
        async fn del(&self, _: &str) -> StorageResult<bool> {
            std::future::pending().await
        }
        async fn expire(&self, _: &str, _: Duration) -> StorageResult<bool> {
            std::future::pending().await
        }
        async fn ttl(&self, _: &str) -> StorageResult<Option<Duration>> {
            std::future::pending().await
        }
        async fn apply(&self, _: WriteBatch) -> StorageResult<()> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_operation_times_out() {
        let store = TimeoutStore::new(StalledStore, Duration::from_millis(250));
        let err = store.zcard("attention:u1").await.unwrap_err();

        assert!(matches!(err, StorageError::Timeout { op: "zcard", limit_ms: 250 }));
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn passes_through_when_fast() {
        let store = TimeoutStore::new(MemoryKvStore::new(), Duration::from_secs(1));
        store.zadd("attention:u1", "a", 50.0).await.unwrap();
        assert_eq!(store.zcard("attention:u1").await.unwrap(), 1);
    }
}
