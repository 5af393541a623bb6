//! Process-local bucket store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::ratelimit::BucketStore;

/// Bucket state kept in process memory.
///
/// Useful when persistence does not matter and every caller runs in the same
/// process. Unknown buckets read as empty and never checked.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Bucket id -> (current volume, last checked)
    state: RwLock<HashMap<String, (f64, f64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self, bucket_id: &str) -> (f64, f64) {
        self.state
            .read()
            .get(bucket_id)
            .copied()
            .unwrap_or((0.0, 0.0))
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn get_current_volume(&self, bucket_id: &str) -> Result<f64> {
        Ok(self.read(bucket_id).0)
    }

    async fn set_current_volume(&self, bucket_id: &str, volume: f64) -> Result<()> {
        let mut state = self.state.write();
        state.entry(bucket_id.to_string()).or_insert((0.0, 0.0)).0 = volume;
        Ok(())
    }

    async fn get_last_checked(&self, bucket_id: &str) -> Result<f64> {
        Ok(self.read(bucket_id).1)
    }

    async fn set_last_checked(&self, bucket_id: &str, timestamp: f64) -> Result<()> {
        let mut state = self.state.write();
        state.entry(bucket_id.to_string()).or_insert((0.0, 0.0)).1 = timestamp;
        Ok(())
    }

    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_to_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.get_current_volume("a:0").await.unwrap(), 0.0);
        assert_eq!(store.get_last_checked("a:0").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let store = MemoryStore::new();
        store.set_current_volume("a:0", 2.5).await.unwrap();
        store.set_last_checked("a:1", 10.0).await.unwrap();

        assert_eq!(store.get_current_volume("a:0").await.unwrap(), 2.5);
        assert_eq!(store.get_last_checked("a:0").await.unwrap(), 0.0);
        assert_eq!(store.get_current_volume("a:1").await.unwrap(), 0.0);
        assert_eq!(store.get_last_checked("a:1").await.unwrap(), 10.0);
    }

    #[tokio::test]
    async fn test_teardown_keeps_working() {
        let store = MemoryStore::new();
        store.teardown().await.unwrap();
        store.teardown().await.unwrap();
        store.set_current_volume("a:0", 1.0).await.unwrap();
        assert_eq!(store.get_current_volume("a:0").await.unwrap(), 1.0);
    }
}
