//! Salience-Store: key-value backend for the salience cache
//!
//! This crate provides the persistence layer the attention / salience cache is
//! built on. It owns all byte-level storage; callers only hold decoded views.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: Redis-shaped primitives, per-key expiry and atomic write batches.
//!
//! ## Key Components
//!
//! - `KvStore`: hashes, sorted sets, lists, expiry and `apply(WriteBatch)`
//! - `MemoryKvStore`: in-process implementation
//! - `SurrealKvStore`: SurrealDB implementation (memory, file or remote)
//! - `TimeoutStore`: per-operation time budget for any store
//! - `Clock`: injected time source used for expiry

pub mod clock;
mod error;
pub mod fakes;
mod handle;
pub mod migrations;
pub mod storage_traits;
pub mod surreal_kv;
pub mod timeout;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StorageError;
pub use fakes::MemoryKvStore;
pub use handle::{connect_cloud, connect_url, CloudConfig, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use storage_traits::{
    resolve_range, KvStore, RankOrder, ScoredMember, StorageResult, WriteBatch, WriteOp,
};
pub use surreal_kv::SurrealKvStore;
pub use timeout::TimeoutStore;
