//! Storage trait for abstracting where bucket state lives.

use async_trait::async_trait;

use crate::error::Result;

/// Trait for bucket state storage.
///
/// This trait abstracts over the in-memory, Redis and SQLite stores so a
/// `Bucket` can drip and admit against any of them. Each store holds two
/// numbers per bucket id: the current fill volume and the last time the
/// bucket was checked (seconds since the Unix epoch).
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Read the current fill volume, creating the record if needed.
    async fn get_current_volume(&self, bucket_id: &str) -> Result<f64>;

    /// Overwrite the current fill volume.
    async fn set_current_volume(&self, bucket_id: &str, volume: f64) -> Result<()>;

    /// Read the last checked timestamp, creating the record if needed.
    async fn get_last_checked(&self, bucket_id: &str) -> Result<f64>;

    /// Overwrite the last checked timestamp.
    async fn set_last_checked(&self, bucket_id: &str, timestamp: f64) -> Result<()>;

    /// Release any connection held by the store.
    async fn teardown(&self) -> Result<()>;
}

/// Opens one store per bucket when a limiter is built.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    /// Open a store for `bucket_id`, whose effective capacity is `capacity`.
    async fn open(&self, bucket_id: &str, capacity: f64) -> Result<Box<dyn BucketStore>>;
}
