//! Observability tests for cache lifecycle tracing.
//!
//! The emit functions must be callable with or without an installed
//! subscriber and must never panic.

use salience_core::{
    emit_attention_added, emit_attention_faded, emit_consolidation_deferred,
    emit_consolidation_finished, emit_cycle_failed, emit_cycle_finished, emit_cycle_phase,
    emit_cycle_started, emit_store_fail_closed, init_tracing, CyclePhase, CycleSpan,
};
use tracing::Level;

#[test]
fn test_cycle_events_emit() {
    init_tracing(false, Level::DEBUG);
    let _span = CycleSpan::enter("u1", "cycle-1");

    emit_cycle_started("u1", 42);
    emit_cycle_phase("u1", CyclePhase::ExtractContext.as_str());
    emit_cycle_finished("u1", 12, 3, false);
    emit_cycle_failed("u1", &"detector crashed");
}

#[test]
fn test_attention_events_emit() {
    emit_attention_added("u1", "m1", 72.5);
    emit_attention_faded("u1", "m1", 31.0);
}

#[test]
fn test_degraded_path_events_emit() {
    emit_consolidation_finished("u1", 101, 10);
    emit_consolidation_deferred("u1", &"summariser unavailable");
    emit_store_fail_closed("attention.contains", "attention:u1", &"connection refused");
}

#[test]
fn test_cycle_span_enter_and_drop() {
    let span = CycleSpan::enter("u2", "cycle-2");
    drop(span);
}
