//! `SalienceCache` entry points that span several components.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::Harness;
use salience_core::{
    pattern_hash, ContextFrame, HotFields, MemoryKvStore, SalienceCache, SalienceConfig,
    SalienceError,
};
use salience_store::SurrealKvStore;
use serde_json::json;

fn content(text: &str) -> HotFields {
    [("content".to_string(), json!(text))].into_iter().collect()
}

#[tokio::test]
async fn attend_caches_content_only_when_attended() {
    let h = Harness::new();

    assert!(!h.cache.attend("u1", "dull", 20.0, Some(&content("x"))).await.unwrap());
    assert_eq!(h.cache.hot_cache().get("u1", "dull").await.unwrap(), None);
    assert_eq!(h.cache.frequency().frequency("dull").await.unwrap(), 0);

    assert!(h.cache.attend("u1", "vivid", 85.0, Some(&content("y"))).await.unwrap());
    assert_eq!(
        h.cache.hot_cache().get("u1", "vivid").await.unwrap(),
        Some(content("y"))
    );
    assert_eq!(h.cache.frequency().frequency("vivid").await.unwrap(), 1);
}

#[tokio::test]
async fn recall_counts_hits_but_not_misses() {
    let h = Harness::new();
    h.cache.attend("u1", "m1", 60.0, Some(&content("x"))).await.unwrap();

    assert!(h.cache.recall("u1", "m1").await.unwrap().is_some());
    assert!(h.cache.recall("u1", "m1").await.unwrap().is_some());
    assert_eq!(h.cache.frequency().frequency("m1").await.unwrap(), 3);

    h.advance(Duration::minutes(61));
    assert!(h.cache.recall("u1", "m1").await.unwrap().is_none());
    assert_eq!(h.cache.frequency().frequency("m1").await.unwrap(), 0);
}

#[tokio::test]
async fn whats_relevant_combines_components() {
    let h = Harness::new();
    h.cache.attend("u1", "A", 45.0, None).await.unwrap();
    h.cache.attend("u1", "B", 80.0, None).await.unwrap();
    h.cache
        .anticipated()
        .replace("u1", &["C".to_string()])
        .await
        .unwrap();
    h.cache
        .context()
        .set("u1", ContextFrame::at("lab").with_activity("testing"))
        .await
        .unwrap();

    let relevant = h.cache.whats_relevant("u1", 10).await.unwrap();
    let attended: Vec<&str> = relevant.attended.iter().map(|m| m.member.as_str()).collect();
    assert_eq!(attended, vec!["B", "A"]);
    assert_eq!(relevant.anticipated, vec!["C".to_string()]);
    assert_eq!(
        relevant.context.and_then(|c| c.location),
        Some("lab".to_string())
    );
    assert!(relevant.four_w.is_empty());
    assert_eq!(relevant.generated_at, h.clock_now());
}

#[tokio::test]
async fn anticipated_and_relevant_read_back_from_surreal() {
    let store = SurrealKvStore::in_memory().await.unwrap();
    let cache = SalienceCache::new(Arc::new(store), SalienceConfig::default()).unwrap();
    let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];

    cache.anticipated().replace("u1", &ids).await.unwrap();
    assert_eq!(cache.anticipated().get("u1").await.unwrap(), ids);

    cache.attend("u1", "m1", 72.0, None).await.unwrap();
    let relevant = cache.whats_relevant("u1", 5).await.unwrap();
    assert_eq!(relevant.anticipated, ids);
    assert_eq!(relevant.attended.len(), 1);
}

#[tokio::test]
async fn whats_relevant_for_unknown_user_is_empty() {
    let h = Harness::new();
    let relevant = h.cache.whats_relevant("nobody", 5).await.unwrap();
    assert!(relevant.attended.is_empty());
    assert!(relevant.anticipated.is_empty());
    assert!(relevant.context.is_none());
}

#[tokio::test]
async fn engram_store_is_reachable_from_cache() {
    let h = Harness::new();
    let hash = pattern_hash(&["see", "you", "soon"]);
    assert!(h.cache.engrams().put(3, 0, &hash, b"\x00\x01").await.unwrap());
    assert_eq!(
        h.cache.engrams().get(3, 0, &hash).await.unwrap(),
        Some(vec![0, 1])
    );
}

#[test]
fn invalid_config_is_rejected_at_build() {
    let config = SalienceConfig {
        attention_threshold: -1.0,
        ..Default::default()
    };
    let result = SalienceCache::new(Arc::new(MemoryKvStore::new()), config);
    assert!(matches!(result, Err(SalienceError::InvalidConfig(_))));
}
