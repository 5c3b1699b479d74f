//! Salience Core
//!
//! Decides, for each user, which remembered items are currently relevant.
//!
//! ## Components
//!
//! - `AttentionWindow`: per-user ranked set of items above the salience threshold
//! - `HotMemoryCache`: short-TTL full-content cache
//! - `FrequencyTracker`: trailing-window access counts
//! - `RollingContextWindows`: short/medium/long event logs with atomic consolidation
//! - `FourWFrame`: who/what/when/where histories
//! - `PatternHashStore`: content-addressed engram cache
//! - `AnticipatedList`: prefetch hints
//! - `ContextFrameStore`: the user's current situation
//! - `AttentionOrchestrator`: the per-input processing cycle
//! - `SalienceCache`: all of the above over one store

pub mod anticipated;
pub mod attention;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod context_frame;
pub mod engram;
mod error;
pub mod four_w;
pub mod frequency;
pub mod hot_cache;
pub mod keys;
pub mod obs;
pub mod orchestrator;
pub mod rolling;
pub mod shared;
pub mod telemetry;

pub use anticipated::AnticipatedList;
pub use attention::{AttentionStats, AttentionWindow};
pub use cache::{Relevance, SalienceCache, SalienceCacheBuilder};
pub use collaborators::{
    ConsolidationTransform, DetectedPatterns, Extractor, IdentityTransform, NullExtractor,
    NullPatternDetector, PatternDetector, RetainLatest,
};
pub use config::{AttentionTtlPolicy, SalienceConfig};
pub use context_frame::{ContextFrame, ContextFrameStore};
pub use engram::{pattern_hash, PatternHashStore, MAX_HEAD_INDEX};
pub use error::{Result, SalienceError};
pub use four_w::{Dimension, Facet, FourW, FourWFrame, FourWHistory, HistoryEntry};
pub use frequency::FrequencyTracker;
pub use hot_cache::{HotFields, HotMemoryCache};
pub use obs::{
    emit_attention_added, emit_attention_faded, emit_consolidation_deferred,
    emit_consolidation_finished, emit_cycle_failed, emit_cycle_finished, emit_cycle_phase,
    emit_cycle_started, emit_store_fail_closed, CycleSpan,
};
pub use orchestrator::{AttentionOrchestrator, CycleOutcome, CyclePhase};
pub use rolling::{
    ConsolidationReport, RollingContextWindows, RollingWindowEntry, WindowCounts, WindowName,
    WindowSet,
};
pub use shared::{Shared, UserLocks};
pub use telemetry::init_tracing;

pub use salience_store::{Clock, KvStore, ManualClock, MemoryKvStore, ScoredMember, SystemClock};
