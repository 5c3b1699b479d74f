//! Who/what/when/where context histories.
//!
//! Each dimension is a JSON array stored under its own field of the user's
//! `attention:4w` hash. An update reads the full history, appends the new
//! non-empty values, drops entries older than the medium window and writes
//! all four dimensions back in one batch.

use std::fmt;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use salience_store::WriteBatch;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::keys;
use crate::rolling::WindowName;
use crate::shared::Shared;

/// One extracted value with the extractor's confidence in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facet {
    pub value: String,
    pub confidence: f64,
}

impl Facet {
    pub fn new(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.trim().is_empty()
    }
}

/// Structured context of one input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FourW {
    pub who: Facet,
    pub what: Facet,
    pub when: Facet,
    #[serde(rename = "where")]
    pub location: Facet,
}

impl FourW {
    pub fn facet(&self, dimension: Dimension) -> &Facet {
        match dimension {
            Dimension::Who => &self.who,
            Dimension::What => &self.what,
            Dimension::When => &self.when,
            Dimension::Where => &self.location,
        }
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.facet(*d).is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Who,
    What,
    When,
    Where,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Who,
        Dimension::What,
        Dimension::When,
        Dimension::Where,
    ];

    /// Hash field holding this dimension's history.
    pub fn field(self) -> &'static str {
        match self {
            Dimension::Who => "who",
            Dimension::What => "what",
            Dimension::When => "when",
            Dimension::Where => "where",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub value: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Windowed history per dimension, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FourWHistory {
    pub who: Vec<HistoryEntry>,
    pub what: Vec<HistoryEntry>,
    pub when: Vec<HistoryEntry>,
    #[serde(rename = "where")]
    pub location: Vec<HistoryEntry>,
}

impl FourWHistory {
    pub fn dimension(&self, dimension: Dimension) -> &[HistoryEntry] {
        match dimension {
            Dimension::Who => &self.who,
            Dimension::What => &self.what,
            Dimension::When => &self.when,
            Dimension::Where => &self.location,
        }
    }

    fn dimension_mut(&mut self, dimension: Dimension) -> &mut Vec<HistoryEntry> {
        match dimension {
            Dimension::Who => &mut self.who,
            Dimension::What => &mut self.what,
            Dimension::When => &mut self.when,
            Dimension::Where => &mut self.location,
        }
    }

    pub fn is_empty(&self) -> bool {
        Dimension::ALL.iter().all(|d| self.dimension(*d).is_empty())
    }
}

pub struct FourWFrame {
    shared: Shared,
}

impl FourWFrame {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Merge `four_w` into the user's histories and return the result.
    pub async fn update(&self, user: &str, four_w: &FourW) -> Result<FourWHistory> {
        let _guard = self.shared.locks.lock(user).await;
        let now = self.shared.clock.now();
        let mut batch = WriteBatch::new();
        let history = self.stage_update(&mut batch, user, four_w, now).await?;
        self.shared.store.apply(batch).await?;
        Ok(history)
    }

    pub async fn get(&self, user: &str) -> Result<FourWHistory> {
        let raw = self.shared.store.hgetall(&keys::four_w(user)).await?;
        let mut history = FourWHistory::default();
        for dimension in Dimension::ALL {
            if let Some(json) = raw.get(dimension.field()) {
                *history.dimension_mut(dimension) = decode_history(user, dimension, json);
            }
        }
        Ok(history)
    }

    /// Read the current history and stage its rewrite with `four_w` merged
    /// in. The caller must hold the user's lock and apply `batch`.
    pub(crate) async fn stage_update(
        &self,
        batch: &mut WriteBatch,
        user: &str,
        four_w: &FourW,
        now: DateTime<Utc>,
    ) -> Result<FourWHistory> {
        let retention = self.shared.config.retention(WindowName::Medium);
        let cutoff = now - ChronoDuration::milliseconds(retention.as_millis() as i64);

        let mut history = self.get(user).await?;
        let mut fields = Vec::with_capacity(Dimension::ALL.len());
        for dimension in Dimension::ALL {
            let entries = history.dimension_mut(dimension);
            let facet = four_w.facet(dimension);
            if !facet.is_empty() {
                entries.push(HistoryEntry {
                    value: facet.value.clone(),
                    confidence: facet.confidence,
                    timestamp: now,
                });
            }
            entries.retain(|e| e.timestamp >= cutoff);
            fields.push((dimension.field().to_string(), serde_json::to_string(entries)?));
        }

        let key = keys::four_w(user);
        batch.hset(&key, fields).expire(&key, retention);
        Ok(history)
    }
}

fn decode_history(user: &str, dimension: Dimension, json: &str) -> Vec<HistoryEntry> {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!(user_id = %user, %dimension, error = %e, "discarding unreadable 4W history");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SalienceConfig;
    use salience_store::{Clock, KvStore, ManualClock, MemoryKvStore};
    use std::sync::Arc;

    fn frame() -> (FourWFrame, Arc<ManualClock>, Arc<MemoryKvStore>) {
        let clock = Arc::new(ManualClock::starting_now());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(MemoryKvStore::with_clock(shared_clock.clone()));
        let shared =
            Shared::new(store.clone(), SalienceConfig::default()).with_clock(shared_clock);
        (FourWFrame::new(shared), clock, store)
    }

    fn sample(who: &str) -> FourW {
        FourW {
            who: Facet::new(who, 0.9),
            what: Facet::new("standup", 0.7),
            when: Facet::default(),
            location: Facet::new("lab", 0.5),
        }
    }

    #[test]
    fn where_uses_its_wire_name() {
        let json = serde_json::to_value(sample("alice")).unwrap();
        assert_eq!(json["where"]["value"], "lab");
        assert!(json.get("location").is_none());
    }

    #[tokio::test]
    async fn empty_facets_are_not_recorded() {
        let (frame, _clock, _store) = frame();
        let history = frame.update("u1", &sample("alice")).await.unwrap();
        assert_eq!(history.who.len(), 1);
        assert!(history.when.is_empty());
        assert_eq!(frame.get("u1").await.unwrap(), history);
    }

    #[tokio::test]
    async fn entries_older_than_medium_window_drop_out() {
        let (frame, clock, _store) = frame();
        frame.update("u1", &sample("alice")).await.unwrap();
        clock.advance(chrono::Duration::minutes(40));
        frame.update("u1", &sample("bob")).await.unwrap();
        clock.advance(chrono::Duration::minutes(30));

        let history = frame.update("u1", &sample("carol")).await.unwrap();
        let who: Vec<&str> = history.who.iter().map(|e| e.value.as_str()).collect();
        assert_eq!(who, vec!["bob", "carol"]);
    }

    #[tokio::test]
    async fn unreadable_dimension_reads_empty() {
        let (frame, _clock, store) = frame();
        frame.update("u1", &sample("alice")).await.unwrap();
        store
            .hset(
                &keys::four_w("u1"),
                &[("who".to_string(), "not json".to_string())],
            )
            .await
            .unwrap();

        let history = frame.get("u1").await.unwrap();
        assert!(history.who.is_empty());
        assert_eq!(history.what.len(), 1);
    }
}
