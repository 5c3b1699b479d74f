//! Shared fixtures for salience-core integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use salience_core::{SalienceCache, SalienceCacheBuilder, SalienceConfig};
use salience_store::{
    Clock, KvStore, ManualClock, MemoryKvStore, RankOrder, ScoredMember, StorageError,
    StorageResult, WriteBatch,
};

/// Memory store that can be switched to fail reads, writes or both.
pub struct FlakyStore {
    inner: MemoryKvStore,
    reads_down: AtomicBool,
    writes_down: AtomicBool,
}

impl FlakyStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: MemoryKvStore::with_clock(clock),
            reads_down: AtomicBool::new(false),
            writes_down: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &MemoryKvStore {
        &self.inner
    }

    pub fn fail_reads(&self, down: bool) {
        self.reads_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, down: bool) {
        self.writes_down.store(down, Ordering::SeqCst);
    }

    pub fn fail_all(&self, down: bool) {
        self.fail_reads(down);
        self.fail_writes(down);
    }

    fn read(&self) -> StorageResult<()> {
        if self.reads_down.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    fn write(&self) -> StorageResult<()> {
        if self.writes_down.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionAborted("write rejected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FlakyStore {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        self.write()?;
        self.inner.hset(key, fields).await
    }

    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.read()?;
        self.inner.hgetall(key).await
    }

    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.read()?;
        self.inner.hexists(key, field).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        self.write()?;
        self.inner.zadd(key, member, score).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        self.write()?;
        self.inner.zrem(key, member).await
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StorageResult<u64> {
        self.write()?;
        self.inner.zrem_range_by_score(key, min, max).await
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RankOrder,
    ) -> StorageResult<Vec<ScoredMember>> {
        self.read()?;
        self.inner.zrange(key, start, stop, order).await
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StorageResult<Vec<ScoredMember>> {
        self.read()?;
        self.inner.zrange_by_score(key, min, max).await
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        self.read()?;
        self.inner.zcard(key).await
    }

    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        self.read()?;
        self.inner.zscore(key, member).await
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        self.write()?;
        self.inner.rpush(key, values).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        self.read()?;
        self.inner.lrange(key, start, stop).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.read()?;
        self.inner.exists(key).await
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        self.write()?;
        self.inner.del(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.write()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> StorageResult<Option<Duration>> {
        self.read()?;
        self.inner.ttl(key).await
    }

    async fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        self.write()?;
        self.inner.apply(batch).await
    }
}

/// A cache over a [`FlakyStore`] driven by a manual clock.
pub struct Harness {
    pub cache: SalienceCache,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|b| b)
    }

    pub fn with_config(config: SalienceConfig) -> Self {
        Self::with(move |b| b.config(config))
    }

    /// Customise the builder before the cache is built.
    pub fn with(customise: impl FnOnce(SalienceCacheBuilder) -> SalienceCacheBuilder) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(FlakyStore::new(shared_clock.clone()));
        let builder = SalienceCache::builder(store.clone()).clock(shared_clock);
        let cache = customise(builder).build().expect("valid test config");
        Self {
            cache,
            clock,
            store,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }

    pub fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Live keys in the backing store.
    pub fn key_count(&self) -> usize {
        self.store.inner().key_count()
    }
}
