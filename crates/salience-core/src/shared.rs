//! Handles shared by every component of one cache instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use salience_store::{Clock, KvStore, SystemClock};
use tokio::sync::OwnedMutexGuard;

use crate::config::SalienceConfig;

/// Idle per-user locks are dropped once the table grows past this size.
const LOCK_TABLE_SOFT_LIMIT: usize = 1024;

/// One async mutex per user.
///
/// Every read-modify-write on a user's keys runs under that user's lock, so
/// concurrent updates for the same user serialize while different users
/// never contend.
#[derive(Debug, Default)]
pub struct UserLocks {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user`. The lock is held until the
    /// returned guard is dropped.
    pub async fn lock(&self, user: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            if table.len() > LOCK_TABLE_SOFT_LIMIT {
                table.retain(|_, m| Arc::strong_count(m) > 1);
            }
            table.entry(user.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Number of users with a lock slot.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Store, clock, config and locks handed to each component.
#[derive(Clone)]
pub struct Shared {
    pub store: Arc<dyn KvStore>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<SalienceConfig>,
    pub locks: Arc<UserLocks>,
}

impl Shared {
    pub fn new(store: Arc<dyn KvStore>, config: SalienceConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            locks: Arc::new(UserLocks::new()),
        }
    }

    /// Use `clock` for every timestamp the components produce. Pass the same
    /// clock the store expires keys with.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
