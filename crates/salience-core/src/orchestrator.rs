//! Per-input processing cycle.
//!
//! `Idle → ExtractContext → UpdateWindows → DetectPatterns → MaybeConsolidate → Idle`
//!
//! Window and 4W writes are staged into one [`WriteBatch`] and committed only
//! after pattern detection succeeds, so a collaborator failure, a store
//! failure or a dropped future leaves the user's windows untouched.
//! Consolidation runs after the commit; its failures are logged and retried
//! on the next cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use salience_store::WriteBatch;
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::collaborators::{
    ConsolidationTransform, DetectedPatterns, Extractor, NullExtractor, NullPatternDetector,
    PatternDetector, RetainLatest,
};
use crate::error::{Result, SalienceError};
use crate::four_w::{FourW, FourWFrame};
use crate::obs;
use crate::rolling::{ConsolidationReport, RollingContextWindows, RollingWindowEntry};
use crate::shared::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    ExtractContext,
    UpdateWindows,
    DetectPatterns,
    MaybeConsolidate,
}

impl CyclePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CyclePhase::Idle => "idle",
            CyclePhase::ExtractContext => "extract_context",
            CyclePhase::UpdateWindows => "update_windows",
            CyclePhase::DetectPatterns => "detect_patterns",
            CyclePhase::MaybeConsolidate => "maybe_consolidate",
        }
    }

    /// The phase that follows this one.
    pub fn next(self) -> CyclePhase {
        match self {
            CyclePhase::Idle => CyclePhase::ExtractContext,
            CyclePhase::ExtractContext => CyclePhase::UpdateWindows,
            CyclePhase::UpdateWindows => CyclePhase::DetectPatterns,
            CyclePhase::DetectPatterns => CyclePhase::MaybeConsolidate,
            CyclePhase::MaybeConsolidate => CyclePhase::Idle,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub four_w: FourW,
    pub patterns: DetectedPatterns,
    pub timestamp: DateTime<Utc>,
    /// Present when this cycle consolidated the windows.
    pub consolidation: Option<ConsolidationReport>,
}

pub struct AttentionOrchestrator {
    shared: Shared,
    frame: FourWFrame,
    windows: RollingContextWindows,
    extractor: Arc<dyn Extractor>,
    detector: Arc<dyn PatternDetector>,
    transform: Arc<dyn ConsolidationTransform>,
}

impl AttentionOrchestrator {
    /// Orchestrator with the reference collaborators: nothing extracted,
    /// nothing detected, each window cut to half the consolidation trigger.
    pub fn new(shared: Shared) -> Self {
        let transform = RetainLatest::for_trigger(shared.config.consolidation_trigger);
        Self {
            frame: FourWFrame::new(shared.clone()),
            windows: RollingContextWindows::new(shared.clone()),
            shared,
            extractor: Arc::new(NullExtractor),
            detector: Arc::new(NullPatternDetector),
            transform: Arc::new(transform),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn PatternDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn ConsolidationTransform>) -> Self {
        self.transform = transform;
        self
    }

    /// Run one cycle for `raw_input`.
    ///
    /// Either every window write of the cycle is committed and the outcome
    /// returned, or nothing is written and the error returned.
    pub async fn process(&self, user: &str, raw_input: &str) -> Result<CycleOutcome> {
        let cycle_id = Uuid::new_v4().to_string();
        self.observed_cycle(user, raw_input)
            .instrument(obs::cycle_span(user, &cycle_id))
            .await
    }

    async fn observed_cycle(&self, user: &str, raw_input: &str) -> Result<CycleOutcome> {
        let started = Instant::now();
        obs::emit_cycle_started(user, raw_input.len());

        match self.run_cycle(user, raw_input).await {
            Ok(outcome) => {
                obs::emit_cycle_finished(
                    user,
                    started.elapsed().as_millis() as u64,
                    outcome.patterns.len(),
                    outcome.consolidation.is_some(),
                );
                Ok(outcome)
            }
            Err(e) => {
                obs::emit_cycle_failed(user, &e);
                Err(e)
            }
        }
    }

    async fn run_cycle(&self, user: &str, raw_input: &str) -> Result<CycleOutcome> {
        let _guard = self.shared.locks.lock(user).await;
        let timestamp = self.shared.clock.now();
        let mut phase = CyclePhase::Idle;

        phase = phase.next();
        obs::emit_cycle_phase(user, phase.as_str());
        let four_w = self
            .extractor
            .extract(raw_input)
            .await
            .map_err(|e| SalienceError::collaborator(phase, e))?;

        phase = phase.next();
        obs::emit_cycle_phase(user, phase.as_str());
        let mut batch = WriteBatch::new();
        self.frame
            .stage_update(&mut batch, user, &four_w, timestamp)
            .await?;
        let entry = RollingWindowEntry::new(timestamp, raw_input, four_w.clone());
        let staged = self
            .windows
            .stage_append_all(&mut batch, user, &entry)
            .await?;

        phase = phase.next();
        obs::emit_cycle_phase(user, phase.as_str());
        let patterns = self
            .detector
            .detect(&four_w, &staged)
            .await
            .map_err(|e| SalienceError::collaborator(phase, e))?;
        self.shared.store.apply(batch).await?;

        phase = phase.next();
        obs::emit_cycle_phase(user, phase.as_str());
        let consolidation = match self.maybe_consolidate(user).await {
            Ok(report) => report,
            Err(e) => {
                obs::emit_consolidation_deferred(user, &e);
                None
            }
        };

        Ok(CycleOutcome {
            four_w,
            patterns,
            timestamp,
            consolidation,
        })
    }

    /// Caller holds the user's lock.
    async fn maybe_consolidate(&self, user: &str) -> Result<Option<ConsolidationReport>> {
        if !self.windows.should_consolidate(user).await? {
            return Ok(None);
        }
        let report = self
            .windows
            .consolidate_locked(user, self.transform.as_ref())
            .await?;
        Ok(Some(report))
    }
}
