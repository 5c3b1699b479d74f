//! Structured observability hooks for cache lifecycle events.
//!
//! This module provides:
//! - Cycle-scoped tracing spans via `CycleSpan` RAII guard
//! - Emission functions for processing cycles, attention changes, consolidation and fail-closed reads
//!
//! Events are emitted at `info!` level, degraded paths at `warn!`.
//! Filter with `RUST_LOG`; see [`crate::telemetry::init_tracing`] for JSON output.

use tracing::{info, warn};

/// RAII guard that enters a cycle-scoped tracing span for the duration of a
/// processing cycle.
///
/// # Example
///
/// ```ignore
/// let _span = CycleSpan::enter("u1", "3f1c...");
/// // Now all tracing calls are associated with user_id = "u1"
/// ```
pub struct CycleSpan {
    _span: tracing::span::EnteredSpan,
}

impl CycleSpan {
    /// Create and enter a span tagged with the user and cycle id.
    pub fn enter(user_id: &str, cycle_id: &str) -> Self {
        Self {
            _span: cycle_span(user_id, cycle_id).entered(),
        }
    }
}

/// The span a processing cycle runs in. Use with `Instrument` across awaits;
/// [`CycleSpan`] is for synchronous sections.
pub fn cycle_span(user_id: &str, cycle_id: &str) -> tracing::Span {
    tracing::info_span!("salience.cycle", user_id = %user_id, cycle_id = %cycle_id)
}

/// Emit event: processing cycle started for an input.
pub fn emit_cycle_started(user_id: &str, input_len: usize) {
    info!(event = "cycle.started", user_id = %user_id, input_len = input_len);
}

/// Emit event: cycle entered a phase.
pub fn emit_cycle_phase(user_id: &str, phase: &str) {
    info!(event = "cycle.phase", user_id = %user_id, phase = %phase);
}

/// Emit event: cycle finished with duration and whether it consolidated.
pub fn emit_cycle_finished(user_id: &str, duration_ms: u64, pattern_count: usize, consolidated: bool) {
    info!(
        event = "cycle.finished",
        user_id = %user_id,
        duration_ms = duration_ms,
        pattern_count = pattern_count,
        consolidated = consolidated,
    );
}

/// Emit event: cycle failed; nothing was committed (warning level).
pub fn emit_cycle_failed(user_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cycle.failed", user_id = %user_id, error = %error);
}

/// Emit event: item entered or stayed in the attention window.
pub fn emit_attention_added(user_id: &str, item_id: &str, score: f64) {
    info!(event = "attention.added", user_id = %user_id, item_id = %item_id, score = score);
}

/// Emit event: item fell below threshold and left the attention window.
pub fn emit_attention_faded(user_id: &str, item_id: &str, score: f64) {
    info!(event = "attention.faded", user_id = %user_id, item_id = %item_id, score = score);
}

/// Emit event: rolling windows replaced by consolidated entries.
pub fn emit_consolidation_finished(user_id: &str, entries_before: usize, entries_after: usize) {
    info!(
        event = "consolidation.finished",
        user_id = %user_id,
        entries_before = entries_before,
        entries_after = entries_after,
    );
}

/// Emit event: consolidation failed and will be retried next cycle (warning level).
pub fn emit_consolidation_deferred(user_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "consolidation.deferred", user_id = %user_id, error = %error);
}

/// Emit event: a store failure was reported as "not attended" / "miss" (warning level).
pub fn emit_store_fail_closed(op: &str, key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "store.fail_closed", op = %op, key = %key, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_span_create() {
        let _span = CycleSpan::enter("u1", "cycle-1");
    }
}
