//! SurrealDB connection setup
//!
//! Supports in-memory (`mem://`), local file (`surrealkv://`) and remote
//! (`ws://` / `wss://`) connections. Every connection attempt is bounded by a
//! timeout; a backend that does not answer in time is reported as
//! unavailable.

use std::future::IntoFuture;
use std::time::Duration;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Default namespace for salience data
pub const DEFAULT_NAMESPACE: &str = "salience";
/// Default database for salience data
pub const DEFAULT_DATABASE: &str = "cache";

/// Configuration for an authenticated (cloud) SurrealDB connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "salience")
    pub namespace: String,
    /// Database name (default: "cache")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "salience")
    /// - SURREALDB_DATABASE (optional, default: "cache")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

async fn bounded<T, F>(what: &'static str, limit: Duration, fut: F) -> StorageResult<T>
where
    F: std::future::Future<Output = Result<T, surrealdb::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StorageError::Unavailable(format!("{what}: {e}"))),
        Err(_) => Err(StorageError::Timeout {
            op: what,
            limit_ms: limit.as_millis() as u64,
        }),
    }
}

/// Connect to an unauthenticated endpoint (`mem://`, `surrealkv://...`,
/// plain `ws://...`) and select the default namespace and database.
#[instrument(skip(connect_timeout))]
pub async fn connect_url(url: &str, connect_timeout: Duration) -> StorageResult<Surreal<Any>> {
    let db = bounded(
        "connect",
        connect_timeout,
        surrealdb::engine::any::connect(url).into_future(),
    )
    .await?;

    bounded(
        "select namespace",
        connect_timeout,
        db.use_ns(DEFAULT_NAMESPACE).use_db(DEFAULT_DATABASE).into_future(),
    )
    .await?;

    info!("SurrealDB connected ({})", url);
    Ok(db)
}

/// Connect to an authenticated endpoint described by `config`.
#[instrument(skip(config, connect_timeout), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
pub async fn connect_cloud(
    config: &CloudConfig,
    connect_timeout: Duration,
) -> StorageResult<Surreal<Any>> {
    info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

    let db = bounded(
        "connect",
        connect_timeout,
        surrealdb::engine::any::connect(config.endpoint.as_str()).into_future(),
    )
    .await?;

    if config.is_root {
        bounded(
            "root authentication",
            connect_timeout,
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .into_future(),
        )
        .await?;
    } else {
        bounded(
            "database authentication",
            connect_timeout,
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .into_future(),
        )
        .await?;
    }

    bounded(
        "select namespace",
        connect_timeout,
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .into_future(),
    )
    .await?;

    info!("SurrealDB Cloud connected");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_config_defaults() {
        let config = CloudConfig::new("wss://example", "user", "pass");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.database, DEFAULT_DATABASE);
        assert!(!config.is_root);

        let config = config.with_namespace("ns").with_database("db").with_root(true);
        assert_eq!(config.namespace, "ns");
        assert_eq!(config.database, "db");
        assert!(config.is_root);
    }
}
