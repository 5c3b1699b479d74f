//! Pluggable collaborators driven by the orchestrator.
//!
//! Deployments supply their own extractor, pattern detectors and
//! consolidation transform. The built-ins here are the reference
//! behaviour: an extractor that finds nothing, a detector that reports
//! nothing, and transforms that keep everything or only the newest entries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::four_w::FourW;
use crate::rolling::{RollingWindowEntry, WindowName, WindowSet};

/// Turns raw input into who/what/when/where facets.
///
/// Returning an all-empty, zero-confidence [`FourW`] is a valid result.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, raw_input: &str) -> anyhow::Result<FourW>;
}

/// Opaque findings, passed through to the caller unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedPatterns {
    pub temporal: Vec<serde_json::Value>,
    pub spatial: Vec<serde_json::Value>,
    pub behavioral: Vec<serde_json::Value>,
    pub contextual: Vec<serde_json::Value>,
}

impl DetectedPatterns {
    pub fn len(&self) -> usize {
        self.temporal.len() + self.spatial.len() + self.behavioral.len() + self.contextual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Looks for patterns in the current input against the rolling windows.
#[async_trait]
pub trait PatternDetector: Send + Sync {
    async fn detect(&self, four_w: &FourW, windows: &WindowSet)
        -> anyhow::Result<DetectedPatterns>;
}

/// Rewrites one window's entries during consolidation.
#[async_trait]
pub trait ConsolidationTransform: Send + Sync {
    async fn consolidate(
        &self,
        window: WindowName,
        entries: Vec<RollingWindowEntry>,
    ) -> anyhow::Result<Vec<RollingWindowEntry>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullExtractor;

#[async_trait]
impl Extractor for NullExtractor {
    async fn extract(&self, _raw_input: &str) -> anyhow::Result<FourW> {
        Ok(FourW::default())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullPatternDetector;

#[async_trait]
impl PatternDetector for NullPatternDetector {
    async fn detect(
        &self,
        _four_w: &FourW,
        _windows: &WindowSet,
    ) -> anyhow::Result<DetectedPatterns> {
        Ok(DetectedPatterns::default())
    }
}

/// Leaves every window as it is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

#[async_trait]
impl ConsolidationTransform for IdentityTransform {
    async fn consolidate(
        &self,
        _window: WindowName,
        entries: Vec<RollingWindowEntry>,
    ) -> anyhow::Result<Vec<RollingWindowEntry>> {
        Ok(entries)
    }
}

/// Keeps the `keep` newest entries of each window.
#[derive(Debug, Clone, Copy)]
pub struct RetainLatest {
    pub keep: usize,
}

impl RetainLatest {
    pub fn new(keep: usize) -> Self {
        Self { keep }
    }

    /// Keeps half of `trigger`, so a consolidated short window takes
    /// `trigger / 2` further appends to cross the trigger again.
    pub fn for_trigger(trigger: u64) -> Self {
        Self::new(usize::try_from(trigger / 2).unwrap_or(usize::MAX))
    }
}

impl Default for RetainLatest {
    fn default() -> Self {
        Self { keep: 50 }
    }
}

#[async_trait]
impl ConsolidationTransform for RetainLatest {
    async fn consolidate(
        &self,
        _window: WindowName,
        mut entries: Vec<RollingWindowEntry>,
    ) -> anyhow::Result<Vec<RollingWindowEntry>> {
        entries.sort_by_key(|e| e.timestamp);
        let excess = entries.len().saturating_sub(self.keep);
        entries.drain(..excess);
        Ok(entries)
    }
}
