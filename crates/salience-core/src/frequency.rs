//! Recency-windowed access counts per item.
//!
//! Each access is a member of the item's sorted set scored by its timestamp
//! in milliseconds. The count is always a live query over the trailing
//! window, so out-of-order timestamps land where they belong.

use chrono::{DateTime, Utc};
use salience_store::WriteBatch;
use uuid::Uuid;

use crate::error::Result;
use crate::keys;
use crate::shared::Shared;

pub struct FrequencyTracker {
    shared: Shared,
}

impl FrequencyTracker {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Record an access at the current time.
    pub async fn record_access(&self, item: &str) -> Result<bool> {
        let now = self.shared.clock.now();
        self.record_access_at(item, now).await
    }

    /// Record an access at `at`, prune accesses that left the window and
    /// refresh the log's safety-net expiry. Returns false for an empty id.
    pub async fn record_access_at(&self, item: &str, at: DateTime<Utc>) -> Result<bool> {
        if item.is_empty() {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        self.stage_access(&mut batch, item, at);
        self.shared.store.apply(batch).await?;
        Ok(true)
    }

    /// Accesses within the trailing window ending now.
    pub async fn frequency(&self, item: &str) -> Result<u64> {
        let cutoff = self.window_start();
        let hits = self
            .shared
            .store
            .zrange_by_score(&keys::frequency(item), cutoff as f64, f64::INFINITY)
            .await?;
        Ok(hits.len() as u64)
    }

    pub(crate) fn stage_access(&self, batch: &mut WriteBatch, item: &str, at: DateTime<Utc>) {
        let key = keys::frequency(item);
        let ts = at.timestamp_millis();
        batch
            .zadd(&key, format!("{ts}-{}", Uuid::new_v4()), ts as f64)
            .zrem_range_by_score(&key, f64::NEG_INFINITY, (self.window_start() - 1) as f64)
            .expire(&key, self.shared.config.frequency_ttl());
    }

    fn window_start(&self) -> i64 {
        let window_ms = self.shared.config.frequency_window().as_millis() as i64;
        self.shared.clock.now_millis() - window_ms
    }
}
