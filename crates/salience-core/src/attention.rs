//! Per-user ranked set of currently salient items.
//!
//! An item is in the set iff its last submitted score is at or above the
//! attention threshold. Scores are supplied by callers; decay happens only
//! when a caller resubmits a lower score through [`AttentionWindow::update_score`].

use salience_store::{RankOrder, ScoredMember, WriteBatch};
use serde::{Deserialize, Serialize};

use crate::config::AttentionTtlPolicy;
use crate::error::Result;
use crate::keys;
use crate::obs;
use crate::shared::Shared;

/// Counts over one user's attention set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionStats {
    pub total: u64,
    /// Items scored at or above the high-salience cutoff.
    pub high_salience: u64,
    /// Items in `[threshold, threshold + fading_band)`.
    pub fading_soon: u64,
}

/// Clamp to `[0, 100]`; NaN is not a score.
pub(crate) fn normalize_score(score: f64) -> Option<f64> {
    if score.is_nan() {
        None
    } else {
        Some(score.clamp(0.0, 100.0))
    }
}

pub struct AttentionWindow {
    shared: Shared,
}

impl AttentionWindow {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Insert or update `item` when `score` reaches the threshold.
    ///
    /// Returns whether the item is attended. A rejected score leaves the set
    /// untouched, including any earlier entry for the item.
    pub async fn add(&self, user: &str, item: &str, score: f64) -> Result<bool> {
        let Some(score) = self.admissible(user, item, score) else {
            return Ok(false);
        };
        let _guard = self.shared.locks.lock(user).await;
        let mut batch = WriteBatch::new();
        self.stage_add(&mut batch, user, item, score);
        self.shared.store.apply(batch).await?;
        obs::emit_attention_added(user, item, score);
        Ok(true)
    }

    /// Re-evaluate `item` with a fresh score: kept when at or above the
    /// threshold, removed otherwise. Returns whether the item is attended.
    pub async fn update_score(&self, user: &str, item: &str, new_score: f64) -> Result<bool> {
        if user.is_empty() || item.is_empty() {
            return Ok(false);
        }
        let Some(score) = normalize_score(new_score) else {
            return Ok(false);
        };
        let key = keys::attention(user);
        let _guard = self.shared.locks.lock(user).await;

        if score >= self.shared.config.attention_threshold {
            let mut batch = WriteBatch::new();
            self.stage_add(&mut batch, user, item, score);
            self.shared.store.apply(batch).await?;
            obs::emit_attention_added(user, item, score);
            Ok(true)
        } else {
            if self.shared.store.zrem(&key, item).await? {
                obs::emit_attention_faded(user, item, score);
            }
            Ok(false)
        }
    }

    /// Unconditional removal. Returns whether the item was present.
    pub async fn remove(&self, user: &str, item: &str) -> Result<bool> {
        let _guard = self.shared.locks.lock(user).await;
        Ok(self.shared.store.zrem(&keys::attention(user), item).await?)
    }

    /// Up to `limit` item ids, highest score first.
    pub async fn top(&self, user: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self
            .top_with_scores(user, limit)
            .await?
            .into_iter()
            .map(|m| m.member)
            .collect())
    }

    /// Up to `limit` items with their scores, highest first.
    ///
    /// Equal scores come back in an order chosen by the store; do not rely on it.
    pub async fn top_with_scores(&self, user: &str, limit: usize) -> Result<Vec<ScoredMember>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit - 1).unwrap_or(i64::MAX);
        Ok(self
            .shared
            .store
            .zrange(&keys::attention(user), 0, stop, RankOrder::Descending)
            .await?)
    }

    pub async fn stats(&self, user: &str) -> Result<AttentionStats> {
        let key = keys::attention(user);
        let config = &self.shared.config;
        let store = &self.shared.store;

        let total = store.zcard(&key).await?;
        let high_salience = store
            .zrange_by_score(&key, config.high_salience, f64::INFINITY)
            .await?
            .len() as u64;
        let fading_upper = config.attention_threshold + config.fading_band;
        let fading_soon = store
            .zrange_by_score(&key, config.attention_threshold, fading_upper)
            .await?
            .iter()
            .filter(|m| m.score < fading_upper)
            .count() as u64;

        Ok(AttentionStats {
            total,
            high_salience,
            fading_soon,
        })
    }

    pub async fn contains(&self, user: &str, item: &str) -> Result<bool> {
        Ok(self
            .shared
            .store
            .zscore(&keys::attention(user), item)
            .await?
            .is_some())
    }

    /// Current score of `item`, if attended.
    pub async fn score(&self, user: &str, item: &str) -> Result<Option<f64>> {
        Ok(self.shared.store.zscore(&keys::attention(user), item).await?)
    }

    /// Drop the whole set. Returns whether it existed.
    pub async fn clear(&self, user: &str) -> Result<bool> {
        let _guard = self.shared.locks.lock(user).await;
        Ok(self.shared.store.del(&keys::attention(user)).await?)
    }

    /// [`contains`](Self::contains) that reports a store failure as "not attended".
    pub async fn is_attended(&self, user: &str, item: &str) -> bool {
        match self.contains(user, item).await {
            Ok(attended) => attended,
            Err(e) => {
                obs::emit_store_fail_closed("attention.contains", &keys::attention(user), &e);
                false
            }
        }
    }

    /// Normalized score when the input would be attended.
    pub(crate) fn admissible(&self, user: &str, item: &str, score: f64) -> Option<f64> {
        if user.is_empty() || item.is_empty() {
            return None;
        }
        normalize_score(score).filter(|s| *s >= self.shared.config.attention_threshold)
    }

    pub(crate) fn stage_add(&self, batch: &mut WriteBatch, user: &str, item: &str, score: f64) {
        let key = keys::attention(user);
        batch.zadd(&key, item, score);
        if self.shared.config.attention_ttl_policy == AttentionTtlPolicy::RefreshOnWrite {
            batch.expire(&key, self.shared.config.attention_ttl());
        }
    }
}
