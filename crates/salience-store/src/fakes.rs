//! In-memory `KvStore` implementation
//!
//! `MemoryKvStore` satisfies the full trait contract, expiry included, with
//! no external dependencies. Expiry is evaluated lazily against the injected
//! [`Clock`], so a [`ManualClock`](crate::clock::ManualClock) can drive it.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// Stored values
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SortedSet {
    /// member -> (score, write sequence)
    members: HashMap<String, (f64, u64)>,
}

impl SortedSet {
    fn ordered(&self, order: RankOrder) -> Vec<ScoredMember> {
        let mut rows: Vec<(&String, f64, u64)> = self
            .members
            .iter()
            .map(|(m, (score, seq))| (m, *score, *seq))
            .collect();
        rows.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.2.cmp(&b.2)));
        if order == RankOrder::Descending {
            rows.reverse();
        }
        rows.into_iter()
            .map(|(m, score, _)| ScoredMember::new(m.clone(), score))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Value {
    Hash(BTreeMap<String, String>),
    SortedSet(SortedSet),
    List(Vec<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Hash(_) => "hash",
            Value::SortedSet(_) => "zset",
            Value::List(_) => "list",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Hash(h) => h.is_empty(),
            Value::SortedSet(z) => z.members.is_empty(),
            Value::List(l) => l.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    /// Unix millis after which the entry is gone.
    expires_at: Option<i64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(key: &str, expected: &'static str, actual: &Value) -> StorageError {
    StorageError::WrongType {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}

// ---------------------------------------------------------------------------
// Keyspace
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    seq: u64,
}

impl Keyspace {
    fn purge_expired(&mut self, key: &str, now: i64) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str, now: i64) -> Option<&mut Entry> {
        self.purge_expired(key, now);
        self.entries.get_mut(key)
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).is_some_and(|e| e.value.is_empty()) {
            self.entries.remove(key);
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn hash(&mut self, key: &str, now: i64) -> StorageResult<Option<&BTreeMap<String, String>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(h),
                ..
            }) => Ok(Some(&*h)),
            Some(other) => Err(wrong_type(key, "hash", &other.value)),
        }
    }

    fn zset(&mut self, key: &str, now: i64) -> StorageResult<Option<&mut SortedSet>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::SortedSet(z),
                ..
            }) => Ok(Some(z)),
            Some(other) => Err(wrong_type(key, "zset", &other.value)),
        }
    }

    fn list(&mut self, key: &str, now: i64) -> StorageResult<Option<&Vec<String>>> {
        match self.live(key, now) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(l),
                ..
            }) => Ok(Some(&*l)),
            Some(other) => Err(wrong_type(key, "list", &other.value)),
        }
    }

    fn hset(&mut self, key: &str, fields: &[(String, String)], now: i64) -> StorageResult<()> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(BTreeMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                for (field, value) in fields {
                    h.insert(field.clone(), value.clone());
                }
            }
            other => return Err(wrong_type(key, "hash", other)),
        }
        self.drop_if_empty(key);
        Ok(())
    }

    fn zadd(&mut self, key: &str, member: &str, score: f64, now: i64) -> StorageResult<()> {
        if score.is_nan() {
            return Err(StorageError::Backend(format!(
                "zadd on `{key}` rejected: score is NaN"
            )));
        }
        self.purge_expired(key, now);
        let seq = self.next_seq();
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::SortedSet(SortedSet::default())));
        match &mut entry.value {
            Value::SortedSet(z) => {
                z.members.insert(member.to_string(), (score, seq));
                Ok(())
            }
            other => Err(wrong_type(key, "zset", other)),
        }
    }

    fn zrem(&mut self, key: &str, member: &str, now: i64) -> StorageResult<bool> {
        let removed = match self.zset(key, now)? {
            Some(z) => z.members.remove(member).is_some(),
            None => false,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn zrem_range_by_score(&mut self, key: &str, min: f64, max: f64, now: i64) -> StorageResult<u64> {
        let removed = match self.zset(key, now)? {
            Some(z) => {
                let before = z.members.len();
                z.members.retain(|_, (score, _)| *score < min || *score > max);
                (before - z.members.len()) as u64
            }
            None => 0,
        };
        self.drop_if_empty(key);
        Ok(removed)
    }

    fn rpush(&mut self, key: &str, values: &[String], now: i64) -> StorageResult<u64> {
        self.purge_expired(key, now);
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(Vec::new())));
        let len = match &mut entry.value {
            Value::List(l) => {
                l.extend(values.iter().cloned());
                l.len() as u64
            }
            other => return Err(wrong_type(key, "list", other)),
        };
        self.drop_if_empty(key);
        Ok(len)
    }

    fn del(&mut self, key: &str, now: i64) -> bool {
        self.purge_expired(key, now);
        self.entries.remove(key).is_some()
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: i64) -> bool {
        match self.live(key, now) {
            Some(entry) => {
                entry.expires_at = Some(now.saturating_add(ttl.as_millis() as i64));
                true
            }
            None => false,
        }
    }

    fn apply_op(&mut self, op: &WriteOp, now: i64) -> StorageResult<()> {
        match op {
            WriteOp::HSet { key, fields } => self.hset(key, fields, now),
            WriteOp::ZAdd { key, member, score } => self.zadd(key, member, *score, now),
            WriteOp::ZRem { key, member } => self.zrem(key, member, now).map(|_| ()),
            WriteOp::ZRemRangeByScore { key, min, max } => {
                self.zrem_range_by_score(key, *min, *max, now).map(|_| ())
            }
            WriteOp::RPush { key, values } => self.rpush(key, values, now).map(|_| ()),
            WriteOp::Del { key } => {
                self.del(key, now);
                Ok(())
            }
            WriteOp::Expire { key, ttl } => {
                self.expire(key, *ttl, now);
                Ok(())
            }
        }
    }
}

fn op_key(op: &WriteOp) -> &str {
    match op {
        WriteOp::HSet { key, .. }
        | WriteOp::ZAdd { key, .. }
        | WriteOp::ZRem { key, .. }
        | WriteOp::ZRemRangeByScore { key, .. }
        | WriteOp::RPush { key, .. }
        | WriteOp::Del { key }
        | WriteOp::Expire { key, .. } => key,
    }
}

// ---------------------------------------------------------------------------
// MemoryKvStore
// ---------------------------------------------------------------------------

/// In-memory key-value store backed by a `HashMap<key, Entry>`.
pub struct MemoryKvStore {
    keyspace: Mutex<Keyspace>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore").finish_non_exhaustive()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Build a store whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            keyspace: Mutex::new(Keyspace::default()),
            clock,
        }
    }

    fn keyspace(&self) -> std::sync::MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live keys (expired keys are not counted).
    pub fn key_count(&self) -> usize {
        let now = self.clock.now_millis();
        let ks = self.keyspace();
        ks.entries.values().filter(|e| !e.is_expired(now)).count()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        let now = self.clock.now_millis();
        self.keyspace().hset(key, fields, now)
    }

    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(ks.hash(key, now)?.cloned().unwrap_or_default())
    }

    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(ks.hash(key, now)?.is_some_and(|h| h.contains_key(field)))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        let now = self.clock.now_millis();
        self.keyspace().zadd(key, member, score, now)
    }

    async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        let now = self.clock.now_millis();
        self.keyspace().zrem(key, member, now)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StorageResult<u64> {
        let now = self.clock.now_millis();
        self.keyspace().zrem_range_by_score(key, min, max, now)
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RankOrder,
    ) -> StorageResult<Vec<ScoredMember>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        let ordered = match ks.zset(key, now)? {
            Some(z) => z.ordered(order),
            None => return Ok(Vec::new()),
        };
        Ok(match resolve_range(ordered.len(), start, stop) {
            Some(range) => ordered[range].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StorageResult<Vec<ScoredMember>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(match ks.zset(key, now)? {
            Some(z) => z
                .ordered(RankOrder::Ascending)
                .into_iter()
                .filter(|m| m.score >= min && m.score <= max)
                .collect(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(ks.zset(key, now)?.map_or(0, |z| z.members.len() as u64))
    }

    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(ks
            .zset(key, now)?
            .and_then(|z| z.members.get(member).map(|(score, _)| *score)))
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        let now = self.clock.now_millis();
        self.keyspace().rpush(key, values, now)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        let list = match ks.list(key, now)? {
            Some(l) => l,
            None => return Ok(Vec::new()),
        };
        Ok(match resolve_range(list.len(), start, stop) {
            Some(range) => list[range].to_vec(),
            None => Vec::new(),
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let now = self.clock.now_millis();
        Ok(self.keyspace().live(key, now).is_some())
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        let now = self.clock.now_millis();
        Ok(self.keyspace().del(key, now))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let now = self.clock.now_millis();
        Ok(self.keyspace().expire(key, ttl, now))
    }

    async fn ttl(&self, key: &str) -> StorageResult<Option<Duration>> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();
        Ok(ks
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    async fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        let now = self.clock.now_millis();
        let mut ks = self.keyspace();

        // Snapshot every touched key so a failing op can roll the batch back.
        let mut snapshot: HashMap<String, Option<Entry>> = HashMap::new();
        for op in batch.ops() {
            let key = op_key(op);
            if !snapshot.contains_key(key) {
                snapshot.insert(key.to_string(), ks.entries.get(key).cloned());
            }
        }

        for op in batch.ops() {
            if let Err(err) = ks.apply_op(op, now) {
                for (key, entry) in snapshot {
                    match entry {
                        Some(entry) => {
                            ks.entries.insert(key, entry);
                        }
                        None => {
                            ks.entries.remove(&key);
                        }
                    }
                }
                return Err(StorageError::TransactionAborted(err.to_string()));
            }
        }
        Ok(())
    }
}
