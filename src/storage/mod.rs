//! Storage backends for bucket state.
//!
//! The backend is picked by configuration: process memory, a Redis instance
//! shared between processes, or a SQLite database file.

mod memory;
mod redis_store;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::memory::MemoryStore;
pub use self::redis_store::{RedisConfig, RedisStore};
pub use self::sqlite::{SqliteConfig, SqliteStore};

use crate::error::{LimiterError, Result};
use crate::ratelimit::{now_seconds, BucketStore, StoreFactory};

/// Which store a limiter's buckets persist to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process-local state
    #[default]
    Memory,
    /// Shared state in Redis
    Redis(RedisConfig),
    /// Shared state in a SQLite file
    Sqlite(SqliteConfig),
}

#[async_trait]
impl StoreFactory for StoreConfig {
    async fn open(&self, _bucket_id: &str, capacity: f64) -> Result<Box<dyn BucketStore>> {
        let store: Box<dyn BucketStore> = match self {
            StoreConfig::Memory => Box::new(MemoryStore::new()),
            StoreConfig::Redis(config) => Box::new(RedisStore::connect(config).await?),
            StoreConfig::Sqlite(config) => Box::new(SqliteStore::connect(config, capacity).await?),
        };
        Ok(store)
    }
}

/// Seconds since the Unix epoch for a stored datetime.
pub(crate) fn to_timestamp(datetime: DateTime<Utc>) -> f64 {
    datetime.timestamp_micros() as f64 / 1_000_000.0
}

/// Datetime for seconds since the Unix epoch.
pub(crate) fn from_timestamp(timestamp: f64) -> Result<DateTime<Utc>> {
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos).ok_or_else(|| {
        LimiterError::InvalidArgument(format!("timestamp {} is out of range", timestamp))
    })
}
