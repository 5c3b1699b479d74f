//! SurrealDB-backed KvStore implementation
//!
//! Every write, single or batched, is rendered into one SurrealQL
//! transaction. Expired keys are purged at the start of each read and each
//! transaction, so expiry is observed exactly like the in-memory store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::handle::{self, CloudConfig};
use crate::migrations;
use crate::storage_traits::*;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A bound query parameter.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum Param {
    Text(String),
    Float(f64),
    Int(i64),
}

#[derive(Debug, Deserialize)]
struct MetaRow {
    key: String,
    kind: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct HashRow {
    field: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct ZsetRow {
    member: String,
    score: f64,
    seq: i64,
}

#[derive(Debug, Deserialize)]
struct ListRow {
    value: String,
}

/// SurrealQL has no infinities; clamp open score bounds to the float range.
fn finite(score: f64) -> f64 {
    score.clamp(f64::MIN, f64::MAX)
}

fn op_kind(op: &WriteOp) -> Option<&'static str> {
    match op {
        WriteOp::HSet { .. } => Some("hash"),
        WriteOp::ZAdd { .. } | WriteOp::ZRem { .. } | WriteOp::ZRemRangeByScore { .. } => {
            Some("zset")
        }
        WriteOp::RPush { .. } => Some("list"),
        WriteOp::Del { .. } | WriteOp::Expire { .. } => None,
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

/// Accumulates statements and their parameters for one query round trip.
#[derive(Default)]
struct Script {
    statements: Vec<String>,
    params: Vec<(String, Param)>,
    /// Key -> parameter name, so each key is bound once.
    key_params: HashMap<String, String>,
}

impl Script {
    fn bind(&mut self, value: Param) -> String {
        let name = format!("p{}", self.params.len());
        self.params.push((name.clone(), value));
        format!("${name}")
    }

    fn bind_key(&mut self, key: &str) -> String {
        if let Some(name) = self.key_params.get(key) {
            return name.clone();
        }
        let name = self.bind(Param::Text(key.to_string()));
        self.key_params.insert(key.to_string(), name.clone());
        name
    }

    fn push(&mut self, statement: String) {
        self.statements.push(statement);
    }

    /// Statements removing `key` entirely when its expiry has passed.
    fn purge_expired(&mut self, key: &str, now: i64) {
        let k = self.bind_key(key);
        let now = self.bind(Param::Int(now));
        let dead = format!(
            "key IN (SELECT VALUE key FROM kv_meta WHERE key = {k} AND expires_at > 0 AND expires_at <= {now})"
        );
        // kv_meta last: the other deletes consult it.
        for table in ["kv_hash", "kv_zset", "kv_list", "kv_meta"] {
            self.push(format!("DELETE {table} WHERE {dead}"));
        }
    }

    /// Statement dropping the meta row of a key left with no data.
    fn drop_meta_if_empty(&mut self, key: &str) {
        let k = self.bind_key(key);
        self.push(format!(
            "DELETE kv_meta WHERE key = {k} \
             AND array::len((SELECT VALUE key FROM kv_hash WHERE key = {k})) = 0 \
             AND array::len((SELECT VALUE key FROM kv_zset WHERE key = {k})) = 0 \
             AND array::len((SELECT VALUE key FROM kv_list WHERE key = {k})) = 0"
        ));
    }

    fn touch_meta(&mut self, key: &str, kind: &'static str) {
        let k = self.bind_key(key);
        let kind = self.bind(Param::Text(kind.to_string()));
        self.push(format!(
            "UPSERT type::thing('kv_meta', {k}) MERGE {{ key: {k}, kind: {kind} }}"
        ));
    }

    fn write_op(&mut self, op: &WriteOp, now: i64, seq: &AtomicU64) {
        match op {
            WriteOp::HSet { key, fields } => {
                if fields.is_empty() {
                    return;
                }
                self.touch_meta(key, "hash");
                let k = self.bind_key(key);
                for (field, value) in fields {
                    let f = self.bind(Param::Text(field.clone()));
                    let v = self.bind(Param::Text(value.clone()));
                    self.push(format!(
                        "UPSERT type::thing('kv_hash', [{k}, {f}]) CONTENT {{ key: {k}, field: {f}, value: {v} }}"
                    ));
                }
            }
            WriteOp::ZAdd { key, member, score } => {
                self.touch_meta(key, "zset");
                let k = self.bind_key(key);
                let m = self.bind(Param::Text(member.clone()));
                let s = self.bind(Param::Float(finite(*score)));
                let q = self.bind(Param::Int(seq.fetch_add(1, Ordering::SeqCst) as i64));
                self.push(format!(
                    "UPSERT type::thing('kv_zset', [{k}, {m}]) CONTENT {{ key: {k}, member: {m}, score: {s}, seq: {q} }}"
                ));
            }
            WriteOp::ZRem { key, member } => {
                let k = self.bind_key(key);
                let m = self.bind(Param::Text(member.clone()));
                self.push(format!("DELETE kv_zset WHERE key = {k} AND member = {m}"));
                self.drop_meta_if_empty(key);
            }
            WriteOp::ZRemRangeByScore { key, min, max } => {
                let k = self.bind_key(key);
                let lo = self.bind(Param::Float(finite(*min)));
                let hi = self.bind(Param::Float(finite(*max)));
                self.push(format!(
                    "DELETE kv_zset WHERE key = {k} AND score >= {lo} AND score <= {hi}"
                ));
                self.drop_meta_if_empty(key);
            }
            WriteOp::RPush { key, values } => {
                if values.is_empty() {
                    return;
                }
                self.touch_meta(key, "list");
                let k = self.bind_key(key);
                let base = format!("$base{}", self.statements.len());
                self.push(format!(
                    "LET {base} = array::len((SELECT VALUE pos FROM kv_list WHERE key = {k}))"
                ));
                for (offset, value) in values.iter().enumerate() {
                    let v = self.bind(Param::Text(value.clone()));
                    self.push(format!(
                        "CREATE kv_list CONTENT {{ key: {k}, pos: {base} + {offset}, value: {v} }}"
                    ));
                }
            }
            WriteOp::Del { key } => {
                let k = self.bind_key(key);
                for table in ["kv_hash", "kv_zset", "kv_list", "kv_meta"] {
                    self.push(format!("DELETE {table} WHERE key = {k}"));
                }
            }
            WriteOp::Expire { key, ttl } => {
                let k = self.bind_key(key);
                let at = self.bind(Param::Int(now.saturating_add(ttl.as_millis() as i64)));
                self.push(format!("UPDATE kv_meta SET expires_at = {at} WHERE key = {k}"));
            }
        }
    }

    fn into_transaction(mut self) -> (String, Vec<(String, Param)>) {
        self.statements.insert(0, "BEGIN TRANSACTION".to_string());
        self.statements.push("COMMIT TRANSACTION".to_string());
        (self.render(), self.params)
    }

    fn render(&self) -> String {
        let mut sql = self.statements.join(";\n");
        sql.push(';');
        sql
    }
}

/// SurrealDB-backed implementation of [`KvStore`].
pub struct SurrealKvStore {
    db: Surreal<Any>,
    clock: Arc<dyn Clock>,
    seq: AtomicU64,
}

impl SurrealKvStore {
    /// Wrap an already connected database, initialising the schema.
    pub async fn new(db: Surreal<Any>, clock: Arc<dyn Clock>) -> StorageResult<Self> {
        migrations::init_schema(&db).await?;
        // Seed the write sequence from the clock so equal-score ordering keeps
        // working across restarts.
        let seed = clock.now().timestamp_micros().max(0) as u64;
        Ok(Self {
            db,
            clock,
            seq: AtomicU64::new(seed),
        })
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock)).await
    }

    /// In-memory instance whose expiry follows `clock`.
    pub async fn in_memory_with_clock(clock: Arc<dyn Clock>) -> StorageResult<Self> {
        let db = handle::connect_url("mem://", DEFAULT_CONNECT_TIMEOUT).await?;
        info!("SurrealKvStore connected (in-memory)");
        Self::new(db, clock).await
    }

    /// Connect to `url` (`surrealkv://path`, `ws://host:port`, ...).
    pub async fn connect(url: &str, connect_timeout: Duration) -> StorageResult<Self> {
        let db = handle::connect_url(url, connect_timeout).await?;
        Self::new(db, Arc::new(SystemClock)).await
    }

    /// Create from environment variables.
    ///
    /// Uses the cloud config when `SURREALDB_ENDPOINT` and credentials are set,
    /// then `SURREALDB_URL`, then local persistence in `.salience/db`.
    pub async fn from_env(connect_timeout: Duration) -> StorageResult<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            let db = handle::connect_cloud(&config, connect_timeout).await?;
            info!("SurrealKvStore connected (cloud)");
            return Self::new(db, Arc::new(SystemClock)).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url, connect_timeout).await;
        }

        let path = ".salience/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Unavailable(format!(
                "Failed to create database directory {}: {}",
                path, e
            ))
        })?;
        let url = format!("surrealkv://{}", path);
        info!(
            "No cloud config or SURREALDB_URL found, using local persistence: {}",
            url
        );
        Self::connect(&url, connect_timeout).await
    }

    // -- private helpers -----------------------------------------------------

    async fn run(&self, sql: String, params: Vec<(String, Param)>) -> StorageResult<surrealdb::Response> {
        let mut query = self.db.query(sql);
        for param in params {
            query = query.bind(param);
        }
        let response = query.await.map_err(StorageError::from)?;
        response
            .check()
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    /// Remove every key in `keys` whose expiry has passed.
    async fn purge(&self, keys: &[String]) -> StorageResult<()> {
        let now = self.clock.now_millis();
        let mut script = Script::default();
        for key in keys {
            script.purge_expired(key, now);
        }
        let sql = script.render();
        self.run(sql, script.params).await.map(|_| ())
    }

    /// Purge `key` if expired, then run the single statement built by
    /// `select` and decode its rows.
    async fn read<T>(&self, key: &str, select: impl FnOnce(&mut Script) -> String) -> StorageResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        self.purge(&[key.to_string()]).await?;
        let mut script = Script::default();
        let statement = select(&mut script);
        script.push(statement);
        let sql = script.render();
        let mut response = self.run(sql, script.params).await?;
        response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    async fn meta(&self, key: &str) -> StorageResult<Option<MetaRow>> {
        let rows: Vec<MetaRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                format!("SELECT key, kind, expires_at FROM kv_meta WHERE key = {k}")
            })
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn zset_rows(&self, key: &str) -> StorageResult<Vec<ScoredMember>> {
        let mut rows: Vec<ZsetRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                format!("SELECT member, score, seq FROM kv_zset WHERE key = {k}")
            })
            .await?;
        rows.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.seq.cmp(&b.seq)));
        Ok(rows
            .into_iter()
            .map(|r| ScoredMember::new(r.member, r.score))
            .collect())
    }

    /// Reject ops whose target key already holds a different structure.
    /// A `Del` earlier in the batch resets the key.
    async fn check_kinds(&self, batch: &WriteBatch) -> StorageResult<()> {
        let keys: Vec<String> = batch
            .ops()
            .iter()
            .map(|op| op_key(op).to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.purge(&keys).await?;
        let mut script = Script::default();
        let ks = script.bind_key_list(&keys);
        script.push(format!("SELECT key, kind, expires_at FROM kv_meta WHERE key IN {ks}"));
        let sql = script.render();
        let mut response = self.run(sql, script.params).await?;
        let rows: Vec<MetaRow> = response
            .take(0)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut kinds: HashMap<String, String> =
            rows.into_iter().map(|r| (r.key, r.kind)).collect();
        for op in batch.ops() {
            let key = op_key(op);
            if matches!(op, WriteOp::Del { .. }) {
                kinds.remove(key);
                continue;
            }
            let Some(expected) = op_kind(op) else {
                continue;
            };
            match kinds.get(key) {
                Some(actual) if actual != expected => {
                    let actual = match actual.as_str() {
                        "hash" => "hash",
                        "zset" => "zset",
                        "list" => "list",
                        _ => "unknown",
                    };
                    return Err(StorageError::WrongType {
                        key: key.to_string(),
                        expected,
                        actual,
                    });
                }
                Some(_) => {}
                None => {
                    kinds.insert(key.to_string(), expected.to_string());
                }
            }
        }
        Ok(())
    }
}

impl Script {
    fn bind_key_list(&mut self, keys: &[String]) -> String {
        let names: Vec<String> = keys.iter().map(|k| self.bind_key(k)).collect();
        format!("[{}]", names.join(", "))
    }
}

#[async_trait]
impl KvStore for SurrealKvStore {
    async fn hset(&self, key: &str, fields: &[(String, String)]) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.hset(key, fields.to_vec());
        self.apply(batch).await
    }

    async fn hgetall(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        let rows: Vec<HashRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                format!("SELECT field, value FROM kv_hash WHERE key = {k}")
            })
            .await?;
        Ok(rows.into_iter().map(|r| (r.field, r.value)).collect())
    }

    async fn hexists(&self, key: &str, field: &str) -> StorageResult<bool> {
        let field = field.to_string();
        let rows: Vec<HashRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                let f = s.bind(Param::Text(field));
                format!("SELECT field, value FROM kv_hash WHERE key = {k} AND field = {f}")
            })
            .await?;
        Ok(!rows.is_empty())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StorageResult<()> {
        if score.is_nan() {
            return Err(StorageError::Backend(format!(
                "zadd on `{key}` rejected: score is NaN"
            )));
        }
        let mut batch = WriteBatch::new();
        batch.zadd(key, member, score);
        self.apply(batch).await
    }

    async fn zrem(&self, key: &str, member: &str) -> StorageResult<bool> {
        let present = self.zscore(key, member).await?.is_some();
        if present {
            let mut batch = WriteBatch::new();
            batch.zrem(key, member);
            self.apply(batch).await?;
        }
        Ok(present)
    }

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> StorageResult<u64> {
        let doomed = self.zrange_by_score(key, min, max).await?.len() as u64;
        if doomed > 0 {
            let mut batch = WriteBatch::new();
            batch.zrem_range_by_score(key, min, max);
            self.apply(batch).await?;
        }
        Ok(doomed)
    }

    async fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RankOrder,
    ) -> StorageResult<Vec<ScoredMember>> {
        let mut rows = self.zset_rows(key).await?;
        if order == RankOrder::Descending {
            rows.reverse();
        }
        Ok(match resolve_range(rows.len(), start, stop) {
            Some(range) => rows[range].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StorageResult<Vec<ScoredMember>> {
        Ok(self
            .zset_rows(key)
            .await?
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect())
    }

    async fn zcard(&self, key: &str) -> StorageResult<u64> {
        let members: Vec<String> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                format!("SELECT VALUE member FROM kv_zset WHERE key = {k}")
            })
            .await?;
        Ok(members.len() as u64)
    }

    async fn zscore(&self, key: &str, member: &str) -> StorageResult<Option<f64>> {
        let member = member.to_string();
        let rows: Vec<ZsetRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                let m = s.bind(Param::Text(member));
                format!("SELECT member, score, seq FROM kv_zset WHERE key = {k} AND member = {m}")
            })
            .await?;
        Ok(rows.into_iter().next().map(|r| r.score))
    }

    async fn rpush(&self, key: &str, values: &[String]) -> StorageResult<u64> {
        let mut batch = WriteBatch::new();
        batch.rpush(key, values.to_vec());
        self.apply(batch).await?;
        Ok(self.lrange(key, 0, -1).await?.len() as u64)
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StorageResult<Vec<String>> {
        let rows: Vec<ListRow> = self
            .read(key, |s| {
                let k = s.bind_key(key);
                format!("SELECT pos, value FROM kv_list WHERE key = {k} ORDER BY pos ASC")
            })
            .await?;
        Ok(match resolve_range(rows.len(), start, stop) {
            Some(range) => rows[range].iter().map(|r| r.value.clone()).collect(),
            None => Vec::new(),
        })
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.meta(key).await?.is_some())
    }

    async fn del(&self, key: &str) -> StorageResult<bool> {
        let existed = self.exists(key).await?;
        let mut batch = WriteBatch::new();
        batch.del(key);
        self.apply(batch).await?;
        Ok(existed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        if !self.exists(key).await? {
            return Ok(false);
        }
        let mut batch = WriteBatch::new();
        batch.expire(key, ttl);
        self.apply(batch).await?;
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> StorageResult<Option<Duration>> {
        let now = self.clock.now_millis();
        Ok(self
            .meta(key)
            .await?
            .and_then(|m| m.expires_at)
            .filter(|at| *at > 0)
            .map(|at| Duration::from_millis((at - now).max(0) as u64)))
    }

    async fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.check_kinds(&batch)
            .await
            .map_err(|e| match e {
                StorageError::WrongType { .. } => StorageError::TransactionAborted(e.to_string()),
                other => other,
            })?;

        let now = self.clock.now_millis();
        let mut script = Script::default();
        let mut purged = HashSet::new();
        for op in batch.ops() {
            let key = op_key(op);
            if purged.insert(key.to_string()) {
                script.purge_expired(key, now);
            }
        }
        for op in batch.ops() {
            script.write_op(op, now, &self.seq);
        }

        debug!(ops = batch.len(), statements = script.statements.len(), "applying batch");
        let (sql, params) = script.into_transaction();
        self.run(sql, params).await.map(|_| ()).map_err(|e| match e {
            StorageError::Backend(msg) => StorageError::TransactionAborted(msg),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_query_is_a_backend_error() {
        let store = SurrealKvStore::in_memory().await.unwrap();
        let err = store
            .run("SELECT FROM WHERE".to_string(), Vec::new())
            .await
            .unwrap_err();
        assert!(!err.is_unavailable(), "unexpected: {err}");
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[tokio::test]
    async fn list_reads_round_trip() {
        let store = SurrealKvStore::in_memory().await.unwrap();
        store
            .rpush("anticipated:u1", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(
            store.lrange("anticipated:u1", 0, -1).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
