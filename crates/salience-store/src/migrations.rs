//! SurrealDB schema migrations and initialization
//!
//! The key-value model is spread over four tables: one per structure kind
//! plus `kv_meta`, which records each live key's kind and expiry.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all key-value tables in SurrealDB
///
/// Safe to call multiple times (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing salience key-value schema");

    init_meta_table(db).await?;
    init_hash_table(db).await?;
    init_zset_table(db).await?;
    init_list_table(db).await?;

    info!("Salience key-value schema initialization complete");
    Ok(())
}

/// Initialize `kv_meta` table
///
/// Schema:
/// ```text
/// TABLE kv_meta {
///   key:         STRING (unique)
///   kind:        STRING (enum: hash | zset | list)
///   expires_at:  INT? (unix millis; absent or 0 = persistent)
/// }
/// ```
async fn init_meta_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing kv_meta table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS kv_meta SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_meta_key ON TABLE kv_meta COLUMNS key UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_meta_expires_at ON TABLE kv_meta COLUMNS expires_at;
    "#;

    db.query(sql).await?;
    info!("✓ kv_meta table initialized");
    Ok(())
}

/// Initialize `kv_hash` table
///
/// Schema:
/// ```text
/// TABLE kv_hash {
///   key:    STRING
///   field:  STRING
///   value:  STRING
/// }
/// ```
///
/// Record id is `[key, field]`, so a field write is an overwrite.
async fn init_hash_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing kv_hash table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS kv_hash SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_hash_key ON TABLE kv_hash COLUMNS key;
    "#;

    db.query(sql).await?;
    info!("✓ kv_hash table initialized");
    Ok(())
}

/// Initialize `kv_zset` table
///
/// Schema:
/// ```text
/// TABLE kv_zset {
///   key:     STRING
///   member:  STRING
///   score:   FLOAT
///   seq:     INT (write sequence, orders equal scores)
/// }
/// ```
async fn init_zset_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing kv_zset table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS kv_zset SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_zset_key ON TABLE kv_zset COLUMNS key;
        DEFINE INDEX IF NOT EXISTS idx_zset_key_score ON TABLE kv_zset COLUMNS key, score;
    "#;

    db.query(sql).await?;
    info!("✓ kv_zset table initialized");
    Ok(())
}

/// Initialize `kv_list` table
///
/// Schema:
/// ```text
/// TABLE kv_list {
///   key:    STRING
///   pos:    INT (0-based, contiguous)
///   value:  STRING
/// }
/// ```
async fn init_list_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing kv_list table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS kv_list SCHEMALESS;

        DEFINE INDEX IF NOT EXISTS idx_list_key_pos ON TABLE kv_list COLUMNS key, pos UNIQUE;
    "#;

    db.query(sql).await?;
    info!("✓ kv_list table initialized");
    Ok(())
}
