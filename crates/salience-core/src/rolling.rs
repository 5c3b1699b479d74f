//! Short / medium / long rolling event logs and their consolidation.
//!
//! Each window is a sorted set scored by entry timestamp (ms) whose members
//! are JSON-encoded entries. Every append prunes entries that fell out of the
//! window's retention. Consolidation rewrites all three windows in a single
//! atomic batch, so a failure leaves every window as it was.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use salience_store::{RankOrder, WriteBatch};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collaborators::ConsolidationTransform;
use crate::error::{Result, SalienceError};
use crate::four_w::FourW;
use crate::keys;
use crate::obs;
use crate::shared::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowName {
    Short,
    Medium,
    Long,
}

impl WindowName {
    pub const ALL: [WindowName; 3] = [WindowName::Short, WindowName::Medium, WindowName::Long];

    pub fn as_str(self) -> &'static str {
        match self {
            WindowName::Short => "short",
            WindowName::Medium => "medium",
            WindowName::Long => "long",
        }
    }
}

impl fmt::Display for WindowName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "short" => Ok(WindowName::Short),
            "medium" => Ok(WindowName::Medium),
            "long" => Ok(WindowName::Long),
            other => Err(format!("unknown window `{other}`")),
        }
    }
}

/// One processed input as recorded in a rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindowEntry {
    /// Keeps identical inputs at the same instant distinct.
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub raw_input: String,
    pub four_w: FourW,
}

impl RollingWindowEntry {
    pub fn new(timestamp: DateTime<Utc>, raw_input: impl Into<String>, four_w: FourW) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            raw_input: raw_input.into(),
            four_w,
        }
    }
}

/// Entries of all three windows, oldest first within each.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowSet {
    pub short: Vec<RollingWindowEntry>,
    pub medium: Vec<RollingWindowEntry>,
    pub long: Vec<RollingWindowEntry>,
}

impl WindowSet {
    pub fn get(&self, window: WindowName) -> &[RollingWindowEntry] {
        match window {
            WindowName::Short => &self.short,
            WindowName::Medium => &self.medium,
            WindowName::Long => &self.long,
        }
    }

    fn get_mut(&mut self, window: WindowName) -> &mut Vec<RollingWindowEntry> {
        match window {
            WindowName::Short => &mut self.short,
            WindowName::Medium => &mut self.medium,
            WindowName::Long => &mut self.long,
        }
    }

    pub fn total(&self) -> usize {
        self.short.len() + self.medium.len() + self.long.len()
    }
}

/// Entry counts before and after a consolidation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    pub before: WindowCounts,
    pub after: WindowCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounts {
    pub short: usize,
    pub medium: usize,
    pub long: usize,
}

impl WindowCounts {
    fn of(set: &WindowSet) -> Self {
        Self {
            short: set.short.len(),
            medium: set.medium.len(),
            long: set.long.len(),
        }
    }

    pub fn total(&self) -> usize {
        self.short + self.medium + self.long
    }
}

fn score_of(entry: &RollingWindowEntry) -> f64 {
    entry.timestamp.timestamp_millis() as f64
}

pub struct RollingContextWindows {
    shared: Shared,
}

impl RollingContextWindows {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Append `entry` to one window and prune what fell out of its retention.
    pub async fn append(
        &self,
        user: &str,
        window: WindowName,
        entry: &RollingWindowEntry,
    ) -> Result<()> {
        let _guard = self.shared.locks.lock(user).await;
        let mut batch = WriteBatch::new();
        self.stage_append(&mut batch, user, window, entry)?;
        self.shared.store.apply(batch).await?;
        Ok(())
    }

    /// Stored entries of one window, oldest first. Unreadable members are
    /// skipped.
    pub async fn entries(&self, user: &str, window: WindowName) -> Result<Vec<RollingWindowEntry>> {
        let members = self
            .shared
            .store
            .zrange(&keys::window(window, user), 0, -1, RankOrder::Ascending)
            .await?;
        Ok(members
            .into_iter()
            .filter_map(|m| match serde_json::from_str(&m.member) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(user_id = %user, %window, error = %e, "skipping unreadable window entry");
                    None
                }
            })
            .collect())
    }

    pub async fn len(&self, user: &str, window: WindowName) -> Result<u64> {
        Ok(self.shared.store.zcard(&keys::window(window, user)).await?)
    }

    pub async fn snapshot(&self, user: &str) -> Result<WindowSet> {
        let (short, medium, long) = futures::try_join!(
            self.entries(user, WindowName::Short),
            self.entries(user, WindowName::Medium),
            self.entries(user, WindowName::Long),
        )?;
        Ok(WindowSet {
            short,
            medium,
            long,
        })
    }

    /// True once the short window holds more entries than the configured
    /// consolidation trigger.
    pub async fn should_consolidate(&self, user: &str) -> Result<bool> {
        Ok(self.len(user, WindowName::Short).await? > self.shared.config.consolidation_trigger)
    }

    /// Replace every window's contents with `transform`'s output.
    ///
    /// All three windows are rewritten or none is. A window the transform
    /// empties reads as empty afterwards.
    pub async fn consolidate(
        &self,
        user: &str,
        transform: &dyn ConsolidationTransform,
    ) -> Result<ConsolidationReport> {
        let _guard = self.shared.locks.lock(user).await;
        self.consolidate_locked(user, transform).await
    }

    /// [`consolidate`](Self::consolidate) for callers already holding the
    /// user's lock.
    pub(crate) async fn consolidate_locked(
        &self,
        user: &str,
        transform: &dyn ConsolidationTransform,
    ) -> Result<ConsolidationReport> {
        let current = self.snapshot(user).await?;
        let mut next = WindowSet::default();
        for window in WindowName::ALL {
            let entries = current.get(window).to_vec();
            *next.get_mut(window) = transform
                .consolidate(window, entries)
                .await
                .map_err(|e| SalienceError::ConsolidationPartial(format!("{window}: {e:#}")))?;
        }

        let mut batch = WriteBatch::new();
        for window in WindowName::ALL {
            let key = keys::window(window, user);
            batch.del(&key);
            for entry in next.get(window) {
                batch.zadd(&key, serde_json::to_string(entry)?, score_of(entry));
            }
            if !next.get(window).is_empty() {
                batch.expire(&key, self.shared.config.retention(window));
            }
        }
        self.shared
            .store
            .apply(batch)
            .await
            .map_err(|e| SalienceError::ConsolidationPartial(e.to_string()))?;

        let report = ConsolidationReport {
            before: WindowCounts::of(&current),
            after: WindowCounts::of(&next),
        };
        obs::emit_consolidation_finished(user, report.before.total(), report.after.total());
        Ok(report)
    }

    /// Stage one append with its pruning and expiry refresh.
    pub(crate) fn stage_append(
        &self,
        batch: &mut WriteBatch,
        user: &str,
        window: WindowName,
        entry: &RollingWindowEntry,
    ) -> Result<()> {
        let key = keys::window(window, user);
        let retention = self.shared.config.retention(window);
        let cutoff = self.shared.clock.now_millis() - retention.as_millis() as i64;

        batch
            .zadd(&key, serde_json::to_string(entry)?, score_of(entry))
            .zrem_range_by_score(&key, f64::NEG_INFINITY, (cutoff - 1) as f64)
            .expire(&key, retention);
        Ok(())
    }

    /// Stage `entry` into all three windows and return what the windows will
    /// hold once `batch` is applied. The caller must hold the user's lock.
    pub(crate) async fn stage_append_all(
        &self,
        batch: &mut WriteBatch,
        user: &str,
        entry: &RollingWindowEntry,
    ) -> Result<WindowSet> {
        let mut view = self.snapshot(user).await?;
        let now = self.shared.clock.now_millis();
        for window in WindowName::ALL {
            self.stage_append(batch, user, window, entry)?;

            let cutoff = now - self.shared.config.retention(window).as_millis() as i64;
            let entries = view.get_mut(window);
            entries.push(entry.clone());
            entries.retain(|e| e.timestamp.timestamp_millis() >= cutoff);
            entries.sort_by_key(|e| e.timestamp);
        }
        debug!(user_id = %user, staged = view.total(), "staged window append");
        Ok(view)
    }
}
