//! Storage trait definitions for the salience cache
//!
//! `KvStore` is the single backend abstraction every cache component is built
//! on. It offers the Redis-shaped primitives the components need:
//! - Hashes: `hset`, `hgetall`, `hexists`
//! - Sorted sets: `zadd`, `zrem`, `zrem_range_by_score`, `zrange`,
//!   `zrange_by_score`, `zcard`, `zscore`
//! - Lists: `rpush`, `lrange`
//! - Generic: `exists`, `del`, `expire`, `ttl`
//! - `apply`: a [`WriteBatch`] executed all-or-nothing
//!
//! All methods are async and backend-agnostic. An in-memory implementation is
//! provided in the `fakes` module, a SurrealDB one in `surreal_kv`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A sorted-set member together with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    pub member: String,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Direction for rank-based sorted-set reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankOrder {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

/// A single write inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    ZRem {
        key: String,
        member: String,
    },
    ZRemRangeByScore {
        key: String,
        min: f64,
        max: f64,
    },
    RPush {
        key: String,
        values: Vec<String>,
    },
    Del {
        key: String,
    },
    Expire {
        key: String,
        ttl: Duration,
    },
}

/// An ordered list of writes applied atomically by [`KvStore::apply`].
///
/// Either every operation takes effect or none does. Operations are applied
/// in insertion order, so `del` followed by `rpush` on the same key replaces
/// the list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.ops.push(WriteOp::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> &mut Self {
        self.ops.push(WriteOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn zrem_range_by_score(&mut self, key: impl Into<String>, min: f64, max: f64) -> &mut Self {
        self.ops.push(WriteOp::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        });
        self
    }

    pub fn rpush(&mut self, key: impl Into<String>, values: Vec<String>) -> &mut Self {
        self.ops.push(WriteOp::RPush {
            key: key.into(),
            values,
        });
        self
    }

    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(WriteOp::Del { key: key.into() });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.ops.push(WriteOp::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    /// Append every op of `other` after the ops already queued.
    pub fn extend(&mut self, other: WriteBatch) -> &mut Self {
        self.ops.extend(other.ops);
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Key-value store with hashes, sorted sets, lists and per-key expiry.
///
/// Guarantees:
/// - An expired key is indistinguishable from an absent one on every read.
/// - Reads of absent keys return empty collections / `None` / `false`,
///   never an error.
/// - `expire` on an absent key is a no-op returning `false`.
/// - `apply` is all-or-nothing.
///
/// Members with equal scores are ordered by their last write (older first
/// when ascending). That is backend behaviour; callers must not depend on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set (or overwrite) fields of a hash.
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()>;

    /// Return every field of a hash. Empty when the key is absent.
    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>>;

    /// Check whether a hash field is present.
    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool>;

    /// Insert a member or update its score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()>;

    /// Remove a member. Returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool>;

    /// Remove every member with `min <= score <= max`. Returns how many.
    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StorageResult<u64>;

    /// Members by rank between `start` and `stop` inclusive. Negative indices
    /// count from the end (`-1` is the last member).
    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RankOrder,
    ) -> StorageResult<Vec<ScoredMember>>;

    /// Members with `min <= score <= max`, ascending.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
        -> StorageResult<Vec<ScoredMember>>;

    /// Number of members in a sorted set.
    async fn zcard(&self, key: &str) -> StorageResult<u64>;

    /// Score of a member, if present.
    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>>;

    /// Append values to a list, returning the new length.
    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64>;

    /// List elements between `start` and `stop` inclusive (negative indices
    /// count from the end).
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>>;

    /// Check whether a key holds any structure.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Delete a key. Returns whether it existed.
    async fn del(&self, key: &str) -> StorageResult<bool>;

    /// Set or refresh a key's time-to-live.
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    /// Remaining time-to-live, `None` when the key is absent or persistent.
    async fn ttl(&self, key: &str) -> StorageResult<Option<Duration>>;

    /// Apply a batch of writes atomically.
    async fn apply(&self, batch: WriteBatch) -> StorageResult<()>;
}

/// Resolve Redis-style inclusive `start..=stop` indices (negatives count from
/// the end) against a collection of `len` elements.
///
/// Returns `None` when the range selects nothing.
pub fn resolve_range(len: usize, start: i64, stop: i64) -> Option<std::ops::RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let norm = |i: i64| if i < 0 { len_i + i } else { i };
    let start = norm(start).max(0);
    let stop = norm(stop).min(len_i - 1);
    if start > stop || start >= len_i {
        return None;
    }
    Some(start as usize..=stop as usize)
}
