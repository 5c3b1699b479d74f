//! Content-addressed pattern → embedding cache.
//!
//! Records live under `engram:{n}gram:h{head}:{hash}` with the embedding
//! hex-encoded in the `embedding` field. They are bounded by TTL only.

use salience_store::WriteBatch;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::Result;
use crate::keys;
use crate::shared::Shared;

/// Highest valid attention head index.
pub const MAX_HEAD_INDEX: u8 = 7;

const EMBEDDING_FIELD: &str = "embedding";

/// Stable 16-hex-character hash of a token sequence.
pub fn pattern_hash<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut hasher = Sha256::new();
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(token.as_ref().as_bytes());
    }
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(16);
    digest
}

pub struct PatternHashStore {
    shared: Shared,
}

impl PatternHashStore {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Store `embedding`, overwriting any previous value and resetting the
    /// expiry. Returns false when the address is invalid.
    pub async fn put(&self, n_gram: u32, head: u8, hash: &str, embedding: &[u8]) -> Result<bool> {
        if !valid_address(n_gram, head, hash) {
            return Ok(false);
        }
        let key = keys::engram(n_gram, head, hash);
        let mut batch = WriteBatch::new();
        batch
            .hset(
                &key,
                vec![(EMBEDDING_FIELD.to_string(), hex::encode(embedding))],
            )
            .expire(&key, self.shared.config.engram_ttl());
        self.shared.store.apply(batch).await?;
        Ok(true)
    }

    pub async fn get(&self, n_gram: u32, head: u8, hash: &str) -> Result<Option<Vec<u8>>> {
        if !valid_address(n_gram, head, hash) {
            return Ok(None);
        }
        let key = keys::engram(n_gram, head, hash);
        let fields = self.shared.store.hgetall(&key).await?;
        let Some(encoded) = fields.get(EMBEDDING_FIELD) else {
            return Ok(None);
        };
        match hex::decode(encoded) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                warn!(%key, error = %e, "treating undecodable engram as absent");
                Ok(None)
            }
        }
    }
}

fn valid_address(n_gram: u32, head: u8, hash: &str) -> bool {
    n_gram > 0 && head <= MAX_HEAD_INDEX && !hash.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SalienceConfig;
    use salience_store::{Clock, KvStore, ManualClock, MemoryKvStore};
    use std::sync::Arc;

    #[test]
    fn pattern_hash_is_stable_and_separates_tokens() {
        let a = pattern_hash(&["the", "cat"]);
        assert_eq!(a.len(), 16);
        assert_eq!(a, pattern_hash(&["the".to_string(), "cat".to_string()]));
        assert_ne!(a, pattern_hash(&["thec", "at"]));
    }

    #[tokio::test]
    async fn put_get_and_expiry() {
        let clock = Arc::new(ManualClock::starting_now());
        let shared_clock: Arc<dyn Clock> = clock.clone();
        let store = Arc::new(MemoryKvStore::with_clock(shared_clock.clone()));
        let engrams = PatternHashStore::new(
            Shared::new(store.clone(), SalienceConfig::default()).with_clock(shared_clock),
        );
        let hash = pattern_hash(&["good", "morning"]);

        assert!(engrams.put(2, 3, &hash, &[1, 2, 255]).await.unwrap());
        assert_eq!(engrams.get(2, 3, &hash).await.unwrap(), Some(vec![1, 2, 255]));
        assert_eq!(engrams.get(2, 4, &hash).await.unwrap(), None);
        assert!(store.exists(&keys::engram(2, 3, &hash)).await.unwrap());

        clock.advance(chrono::Duration::hours(25));
        assert_eq!(engrams.get(2, 3, &hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn out_of_range_head_is_rejected() {
        let engrams = PatternHashStore::new(Shared::new(
            Arc::new(MemoryKvStore::new()),
            SalienceConfig::default(),
        ));
        assert!(!engrams.put(2, 8, "abcd", &[1]).await.unwrap());
        assert!(!engrams.put(0, 1, "abcd", &[1]).await.unwrap());
        assert_eq!(engrams.get(2, 8, "abcd").await.unwrap(), None);
    }
}
