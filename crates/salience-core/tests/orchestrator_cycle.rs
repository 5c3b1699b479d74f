//! Per-input processing cycle: all-or-nothing commits and deferred consolidation.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::Harness;
use salience_core::{
    ConsolidationTransform, CyclePhase, DetectedPatterns, Extractor, Facet, FourW,
    PatternDetector, RetainLatest, RollingWindowEntry, SalienceConfig, SalienceError, WindowName,
    WindowSet,
};
use serde_json::json;

struct StubExtractor;

#[async_trait]
impl Extractor for StubExtractor {
    async fn extract(&self, raw_input: &str) -> anyhow::Result<FourW> {
        Ok(FourW {
            who: Facet::new("alice", 0.9),
            what: Facet::new(raw_input, 0.6),
            when: Facet::default(),
            location: Facet::new("lab", 0.8),
        })
    }
}

struct BrokenExtractor;

#[async_trait]
impl Extractor for BrokenExtractor {
    async fn extract(&self, _raw_input: &str) -> anyhow::Result<FourW> {
        anyhow::bail!("extraction service timed out")
    }
}

/// Reports how many entries the short window will hold.
struct CountingDetector;

#[async_trait]
impl PatternDetector for CountingDetector {
    async fn detect(
        &self,
        four_w: &FourW,
        windows: &WindowSet,
    ) -> anyhow::Result<DetectedPatterns> {
        Ok(DetectedPatterns {
            temporal: vec![json!({"short_entries": windows.short.len()})],
            contextual: vec![json!({"who": four_w.who.value})],
            ..Default::default()
        })
    }
}

struct BrokenDetector;

#[async_trait]
impl PatternDetector for BrokenDetector {
    async fn detect(&self, _: &FourW, _: &WindowSet) -> anyhow::Result<DetectedPatterns> {
        anyhow::bail!("detector crashed")
    }
}

/// Fails the first `failures` consolidation calls, then keeps the newest entry.
struct FlakyTransform {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ConsolidationTransform for FlakyTransform {
    async fn consolidate(
        &self,
        window: WindowName,
        entries: Vec<RollingWindowEntry>,
    ) -> anyhow::Result<Vec<RollingWindowEntry>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            anyhow::bail!("summariser unavailable");
        }
        RetainLatest::new(1).consolidate(window, entries).await
    }
}

fn small_trigger() -> SalienceConfig {
    SalienceConfig {
        consolidation_trigger: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn cycle_updates_windows_and_returns_patterns() {
    let h = Harness::with(|b| {
        b.extractor(Arc::new(StubExtractor))
            .detector(Arc::new(CountingDetector))
    });

    let outcome = h.cache.process("u1", "design review").await.unwrap();
    assert_eq!(outcome.four_w.who.value, "alice");
    assert_eq!(outcome.timestamp, h.clock_now());
    assert_eq!(outcome.patterns.temporal, vec![json!({"short_entries": 1})]);
    assert_eq!(outcome.patterns.contextual, vec![json!({"who": "alice"})]);
    assert!(outcome.consolidation.is_none());

    for window in WindowName::ALL {
        let entries = h.cache.windows().entries("u1", window).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw_input, "design review");
    }
    let history = h.cache.four_w().get("u1").await.unwrap();
    assert_eq!(history.who.len(), 1);
    assert_eq!(history.location[0].value, "lab");
    assert!(history.when.is_empty());
}

#[tokio::test]
async fn empty_extraction_is_not_a_failure() {
    let h = Harness::new();

    let outcome = h.cache.process("u1", "hello").await.unwrap();
    assert!(outcome.four_w.is_empty());
    assert!(outcome.patterns.is_empty());
    assert_eq!(
        h.cache.windows().len("u1", WindowName::Short).await.unwrap(),
        1
    );
    assert!(h.cache.four_w().get("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn extractor_failure_writes_nothing() {
    let h = Harness::with(|b| b.extractor(Arc::new(BrokenExtractor)));

    let err = h.cache.process("u1", "hello").await.unwrap_err();
    assert!(matches!(
        err,
        SalienceError::Collaborator {
            stage: CyclePhase::ExtractContext,
            ..
        }
    ));
    assert_eq!(h.key_count(), 0);
}

#[tokio::test]
async fn detector_failure_writes_nothing() {
    let h = Harness::with(|b| {
        b.extractor(Arc::new(StubExtractor))
            .detector(Arc::new(BrokenDetector))
    });

    let err = h.cache.process("u1", "hello").await.unwrap_err();
    match err {
        SalienceError::Collaborator { stage, reason } => {
            assert_eq!(stage, CyclePhase::DetectPatterns);
            assert!(reason.contains("detector crashed"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.key_count(), 0);
}

#[tokio::test]
async fn rejected_commit_writes_nothing() {
    let h = Harness::with(|b| b.extractor(Arc::new(StubExtractor)));

    h.store.fail_writes(true);
    let err = h.cache.process("u1", "hello").await.unwrap_err();
    h.store.fail_writes(false);

    assert!(err.is_retryable());
    assert_eq!(h.key_count(), 0);
}

#[tokio::test]
async fn unreachable_store_fails_the_cycle() {
    let h = Harness::new();
    h.store.fail_all(true);

    let err = h.cache.process("u1", "hello").await.unwrap_err();
    assert!(matches!(err, SalienceError::StoreUnavailable(_)));
}

#[tokio::test]
async fn consolidates_once_trigger_is_passed() {
    let h = Harness::with(|b| {
        b.config(small_trigger())
            .transform(Arc::new(RetainLatest::new(2)))
    });

    for i in 0..3 {
        let outcome = h.cache.process("u1", &format!("input {i}")).await.unwrap();
        assert!(outcome.consolidation.is_none());
    }
    let outcome = h.cache.process("u1", "input 3").await.unwrap();
    let report = outcome.consolidation.expect("fourth cycle consolidates");
    assert_eq!(report.before.short, 4);
    assert_eq!(report.after.short, 2);

    let entries = h
        .cache
        .windows()
        .entries("u1", WindowName::Short)
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn default_transform_does_not_consolidate_every_cycle() {
    let h = Harness::with_config(small_trigger());

    let mut consolidated = Vec::new();
    for i in 0..10 {
        let outcome = h.cache.process("u1", &format!("input {i}")).await.unwrap();
        consolidated.push(outcome.consolidation.is_some());
    }
    assert_eq!(
        consolidated,
        vec![false, false, false, true, false, false, true, false, false, true]
    );
    assert_eq!(
        h.cache.windows().len("u1", WindowName::Short).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn consolidation_failure_is_deferred_to_next_cycle() {
    let transform = Arc::new(FlakyTransform {
        failures: 1,
        calls: AtomicUsize::new(0),
    });
    let h = Harness::with(|b| b.config(small_trigger()).transform(transform.clone()));

    for i in 0..4 {
        let outcome = h.cache.process("u1", &format!("input {i}")).await.unwrap();
        assert!(outcome.consolidation.is_none());
    }
    // The failed attempt left every window intact.
    assert_eq!(
        h.cache.windows().len("u1", WindowName::Short).await.unwrap(),
        4
    );

    let outcome = h.cache.process("u1", "input 4").await.unwrap();
    assert!(outcome.consolidation.is_some());
    assert_eq!(
        h.cache.windows().len("u1", WindowName::Short).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn concurrent_cycles_for_one_user_lose_nothing() {
    let h = Arc::new(Harness::with(|b| b.extractor(Arc::new(StubExtractor))));

    let mut tasks = Vec::new();
    for i in 0..16 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.cache.process("u1", &format!("input {i}")).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(
        h.cache.windows().len("u1", WindowName::Short).await.unwrap(),
        16
    );
    assert_eq!(h.cache.four_w().get("u1").await.unwrap().who.len(), 16);
}

#[tokio::test]
async fn cancelled_cycle_commits_nothing() {
    struct SlowDetector;

    #[async_trait]
    impl PatternDetector for SlowDetector {
        async fn detect(&self, _: &FourW, _: &WindowSet) -> anyhow::Result<DetectedPatterns> {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            Ok(DetectedPatterns::default())
        }
    }

    let h = Harness::with(|b| {
        b.extractor(Arc::new(StubExtractor))
            .detector(Arc::new(SlowDetector))
    });

    let cycle = h.cache.process("u1", "hello");
    let timed_out =
        tokio::time::timeout(std::time::Duration::from_millis(50), cycle).await;
    assert!(timed_out.is_err());
    assert_eq!(h.key_count(), 0);

    // The user's lock was released with the dropped cycle.
    h.cache.attention().add("u1", "m1", 50.0).await.unwrap();
}
