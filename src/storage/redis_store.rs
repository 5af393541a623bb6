//! Redis-backed bucket store.
//!
//! Each bucket keeps two float keys, `{bucket_id}:volume` and
//! `{bucket_id}:last`, so any number of processes pointing at the same
//! Redis database share the same buckets.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::now_seconds;
use crate::error::{LimiterError, Result};
use crate::ratelimit::BucketStore;

/// Connection settings for a Redis store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Host name or IP of the Redis instance
    #[serde(default = "default_host")]
    pub host: String,

    /// Port Redis is listening on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Logical database index
    #[serde(default)]
    pub database: i64,

    /// Password, if the instance requires one
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database: 0,
            password: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

impl RedisConfig {
    /// Build the connection URL.
    /// Format: "redis://[:{password}@]{host}:{port}/{database}"
    pub fn url(&self) -> String {
        let auth = match &self.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.database)
    }
}

/// Key holding a bucket's fill volume.
pub fn volume_key(bucket_id: &str) -> String {
    format!("{}:volume", bucket_id)
}

/// Key holding a bucket's last checked timestamp.
pub fn last_checked_key(bucket_id: &str) -> String {
    format!("{}:last", bucket_id)
}

/// Bucket state stored in Redis.
pub struct RedisStore {
    /// Released on teardown
    connection: RwLock<Option<ConnectionManager>>,
    /// Bucket ids whose keys are known to exist
    initialized: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connected", &self.connection.read().is_some())
            .finish()
    }
}

impl RedisStore {
    /// Connect to the Redis instance described by `config`.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            "Connecting to Redis bucket store"
        );

        let client = redis::Client::open(config.url())?;
        let manager = ConnectionManager::new(client).await?;

        Ok(Self {
            connection: RwLock::new(Some(manager)),
            initialized: Mutex::new(HashSet::new()),
        })
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.connection.read().clone().ok_or_else(|| {
            LimiterError::BackendUnavailable("redis connection has been released".to_string())
        })
    }

    /// Create both keys on first use without clobbering values other
    /// processes may already have written.
    async fn ensure_record(&self, conn: &mut ConnectionManager, bucket_id: &str) -> Result<()> {
        if self.initialized.lock().contains(bucket_id) {
            return Ok(());
        }

        let _: () = redis::pipe()
            .cmd("SET")
            .arg(volume_key(bucket_id))
            .arg(0.0_f64)
            .arg("NX")
            .ignore()
            .cmd("SET")
            .arg(last_checked_key(bucket_id))
            .arg(now_seconds())
            .arg("NX")
            .ignore()
            .query_async(conn)
            .await?;

        debug!(bucket = %bucket_id, "Initialized Redis bucket keys");
        self.initialized.lock().insert(bucket_id.to_string());
        Ok(())
    }

    async fn get_float(&self, bucket_id: &str, key: String) -> Result<f64> {
        let mut conn = self.connection()?;
        self.ensure_record(&mut conn, bucket_id).await?;
        let value: Option<f64> = conn.get(key).await?;
        Ok(value.unwrap_or(0.0))
    }

    async fn set_float(&self, key: String, value: f64) -> Result<()> {
        let mut conn = self.connection()?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn get_current_volume(&self, bucket_id: &str) -> Result<f64> {
        self.get_float(bucket_id, volume_key(bucket_id)).await
    }

    async fn set_current_volume(&self, bucket_id: &str, volume: f64) -> Result<()> {
        self.set_float(volume_key(bucket_id), volume).await
    }

    async fn get_last_checked(&self, bucket_id: &str) -> Result<f64> {
        self.get_float(bucket_id, last_checked_key(bucket_id)).await
    }

    async fn set_last_checked(&self, bucket_id: &str, timestamp: f64) -> Result<()> {
        self.set_float(last_checked_key(bucket_id), timestamp).await
    }

    async fn teardown(&self) -> Result<()> {
        if self.connection.write().take().is_some() {
            debug!("Released Redis connection");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_without_password() {
        let config = RedisConfig {
            host: "cache.local".to_string(),
            port: 6380,
            database: 2,
            password: None,
        };
        assert_eq!(config.url(), "redis://cache.local:6380/2");
    }

    #[test]
    fn test_url_with_password() {
        let config = RedisConfig {
            password: Some("s3cret".to_string()),
            ..Default::default()
        };
        assert_eq!(config.url(), "redis://:s3cret@127.0.0.1:6379/0");
    }

    #[test]
    fn test_keys() {
        assert_eq!(volume_key("api:0"), "api:0:volume");
        assert_eq!(last_checked_key("api:0"), "api:0:last");
    }

    #[tokio::test]
    #[ignore = "requires a Redis server on 127.0.0.1:6379"]
    async fn test_redis_round_trip_and_teardown() {
        let store = RedisStore::connect(&RedisConfig::default()).await.unwrap();
        let id = format!("drip-test:{}", now_seconds());

        assert_eq!(store.get_current_volume(&id).await.unwrap(), 0.0);
        assert!(store.get_last_checked(&id).await.unwrap() > 0.0);

        store.set_current_volume(&id, 1.5).await.unwrap();
        assert_eq!(store.get_current_volume(&id).await.unwrap(), 1.5);

        store.teardown().await.unwrap();
        store.teardown().await.unwrap();
        assert!(matches!(
            store.get_current_volume(&id).await,
            Err(LimiterError::BackendUnavailable(_))
        ));
    }
}
