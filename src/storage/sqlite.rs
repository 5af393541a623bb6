//! SQLite-backed bucket store.
//!
//! Buckets live in a single `rate_limit` table, one row per bucket id. Rows
//! are created the first time a bucket is read or written.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use super::{from_timestamp, to_timestamp};
use crate::error::Result;
use crate::ratelimit::BucketStore;

const CREATE_LIMITER_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS rate_limit (
        bucket VARCHAR(255) PRIMARY KEY,
        current_volume FLOAT NOT NULL,
        max_volume FLOAT NOT NULL,
        last_time_checked DATETIME NOT NULL
    )";

const INSERT_BUCKET: &str = "
    INSERT OR IGNORE INTO rate_limit (bucket, current_volume, max_volume, last_time_checked)
    VALUES (?, 0, ?, ?)";

const SELECT_VOLUME: &str = "SELECT current_volume FROM rate_limit WHERE bucket = ?";

const SELECT_LAST_CHECKED: &str = "SELECT last_time_checked FROM rate_limit WHERE bucket = ?";

const UPDATE_VOLUME: &str = "UPDATE rate_limit SET current_volume = ? WHERE bucket = ?";

const UPDATE_LAST_CHECKED: &str = "UPDATE rate_limit SET last_time_checked = ? WHERE bucket = ?";

/// Location of the SQLite database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file, created if missing
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// `limiter.sqlite` in the system temp directory.
fn default_db_path() -> PathBuf {
    std::env::temp_dir().join("limiter.sqlite")
}

/// Bucket state stored in a SQLite table.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    /// Recorded in the `max_volume` column of new rows
    max_volume: f64,
    /// Bucket ids whose rows are known to exist
    initialized: Mutex<HashSet<String>>,
}

impl SqliteStore {
    /// Open (or create) the database file named by `config`.
    pub async fn connect(config: &SqliteConfig, max_volume: f64) -> Result<Self> {
        info!(path = %config.path.display(), "Opening SQLite bucket store");

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true);
        Self::connect_with(options, max_volume).await
    }

    /// Open a private in-memory database. State does not outlive the store.
    pub async fn in_memory(max_volume: f64) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect_with(options, max_volume).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_volume: f64) -> Result<Self> {
        // One long-lived connection per bucket; an in-memory database only
        // exists as long as its connection does.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_LIMITER_TABLE).execute(&pool).await?;

        Ok(Self {
            pool,
            max_volume,
            initialized: Mutex::new(HashSet::new()),
        })
    }

    async fn ensure_record(&self, bucket_id: &str) -> Result<()> {
        if self.initialized.lock().contains(bucket_id) {
            return Ok(());
        }

        let result = sqlx::query(INSERT_BUCKET)
            .bind(bucket_id)
            .bind(self.max_volume)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() > 0 {
            debug!(bucket = %bucket_id, "Created SQLite bucket row");
        }
        self.initialized.lock().insert(bucket_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl BucketStore for SqliteStore {
    async fn get_current_volume(&self, bucket_id: &str) -> Result<f64> {
        self.ensure_record(bucket_id).await?;
        let volume: f64 = sqlx::query_scalar(SELECT_VOLUME)
            .bind(bucket_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(volume)
    }

    async fn set_current_volume(&self, bucket_id: &str, volume: f64) -> Result<()> {
        self.ensure_record(bucket_id).await?;
        sqlx::query(UPDATE_VOLUME)
            .bind(volume)
            .bind(bucket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_last_checked(&self, bucket_id: &str) -> Result<f64> {
        self.ensure_record(bucket_id).await?;
        let last_checked: DateTime<Utc> = sqlx::query_scalar(SELECT_LAST_CHECKED)
            .bind(bucket_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(to_timestamp(last_checked))
    }

    async fn set_last_checked(&self, bucket_id: &str, timestamp: f64) -> Result<()> {
        self.ensure_record(bucket_id).await?;
        sqlx::query(UPDATE_LAST_CHECKED)
            .bind(from_timestamp(timestamp)?)
            .bind(bucket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!("Closed SQLite pool");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;
    use crate::storage::now_seconds;

    #[test]
    fn test_default_path_is_in_temp_dir() {
        let config = SqliteConfig::default();
        assert_eq!(config.path, std::env::temp_dir().join("limiter.sqlite"));
    }

    #[tokio::test]
    async fn test_row_created_lazily() {
        let store = SqliteStore::in_memory(5.0).await.unwrap();
        let before = now_seconds();

        assert_eq!(store.get_current_volume("api:0").await.unwrap(), 0.0);
        let last = store.get_last_checked("api:0").await.unwrap();
        assert!(last >= before - 1.0);

        let max_volume: f64 = sqlx::query_scalar("SELECT max_volume FROM rate_limit WHERE bucket = ?")
            .bind("api:0")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(max_volume, 5.0);
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = SqliteStore::in_memory(5.0).await.unwrap();

        store.set_current_volume("api:0", 3.25).await.unwrap();
        store.set_last_checked("api:0", 1_700_000_000.5).await.unwrap();

        assert_eq!(store.get_current_volume("api:0").await.unwrap(), 3.25);
        let last = store.get_last_checked("api:0").await.unwrap();
        assert!((last - 1_700_000_000.5).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_teardown_closes_pool_once() {
        let store = SqliteStore::in_memory(1.0).await.unwrap();
        store.get_current_volume("api:0").await.unwrap();

        store.teardown().await.unwrap();
        store.teardown().await.unwrap();

        assert!(matches!(
            store.get_current_volume("api:1").await,
            Err(LimiterError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_file_database_is_shared_between_stores() {
        let path = std::env::temp_dir().join(format!("drip-test-{}.sqlite", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let config = SqliteConfig { path: path.clone() };

        let first = SqliteStore::connect(&config, 5.0).await.unwrap();
        first.set_current_volume("shared:0", 4.0).await.unwrap();

        let second = SqliteStore::connect(&config, 5.0).await.unwrap();
        assert_eq!(second.get_current_volume("shared:0").await.unwrap(), 4.0);

        first.teardown().await.unwrap();
        second.teardown().await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
