//! Short-lived prefetch hints per user.

use salience_store::WriteBatch;

use crate::error::Result;
use crate::keys;
use crate::shared::Shared;

pub struct AnticipatedList {
    shared: Shared,
}

impl AnticipatedList {
    pub fn new(shared: Shared) -> Self {
        Self { shared }
    }

    /// Replace the list with `items` in one atomic batch. An empty `items`
    /// clears the list.
    pub async fn replace(&self, user: &str, items: &[String]) -> Result<()> {
        let key = keys::anticipated(user);
        let _guard = self.shared.locks.lock(user).await;

        let mut batch = WriteBatch::new();
        batch.del(&key);
        if !items.is_empty() {
            batch
                .rpush(&key, items.to_vec())
                .expire(&key, self.shared.config.anticipated_ttl());
        }
        self.shared.store.apply(batch).await?;
        Ok(())
    }

    pub async fn get(&self, user: &str) -> Result<Vec<String>> {
        Ok(self
            .shared
            .store
            .lrange(&keys::anticipated(user), 0, -1)
            .await?)
    }
}
