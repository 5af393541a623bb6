//! Leaky bucket implementation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::backend::BucketStore;
use super::rate::Rate;
use crate::error::{LimiterError, Result};

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A leaky bucket for a single rate ceiling.
///
/// The fill volume drains continuously at the rate's `rate_per_second` and
/// grows by the task cost on every admission. State is read from and written
/// back to the bucket's store on every check, so several processes sharing a
/// remote store share the same bucket.
///
/// Checks made through the same `Bucket` are serialized. Buckets in other
/// processes pointing at the same id are not, so under contention across
/// processes the volume can briefly exceed capacity.
pub struct Bucket {
    /// Key under which the bucket state is persisted
    id: String,
    /// Effective capacity copied from the rate
    capacity: f64,
    /// The rate this bucket drains at
    rate: Rate,
    /// Where the volume and last checked time live
    store: Box<dyn BucketStore>,
    /// Serializes drip, check and increment for this instance
    admission: Mutex<()>,
    /// Set once the store has been released
    torn_down: AtomicBool,
}

impl Bucket {
    /// Create a new bucket backed by `store`.
    pub fn new(id: impl Into<String>, rate: Rate, store: Box<dyn BucketStore>) -> Self {
        Self {
            id: id.into(),
            capacity: rate.capacity(),
            rate,
            store,
            admission: Mutex::new(()),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn rate(&self) -> &Rate {
        &self.rate
    }

    /// Read the stored fill volume without dripping.
    pub async fn current_volume(&self) -> Result<f64> {
        self.store.get_current_volume(&self.id).await
    }

    /// Decay the stored volume for the time elapsed since the last check.
    pub async fn drip(&self) -> Result<f64> {
        self.drip_at(now_seconds()).await
    }

    /// Decay the stored volume as of `now` and return the new volume.
    ///
    /// The last checked time is always moved to `now`, even when the bucket
    /// is already empty.
    pub async fn drip_at(&self, now: f64) -> Result<f64> {
        let mut volume = self.store.get_current_volume(&self.id).await?;

        if volume > 0.0 {
            let last_checked = self.store.get_last_checked(&self.id).await?;
            let elapsed = (now - last_checked).max(0.0);
            let leaked = elapsed * self.rate.rate_per_second();
            volume = (volume - leaked).max(0.0);
            self.store.set_current_volume(&self.id, volume).await?;
        }

        self.store.set_last_checked(&self.id, now).await?;
        Ok(volume)
    }

    /// Drip, then report whether admitting `task_cost` would overflow.
    pub async fn would_overflow(&self, task_cost: f64) -> Result<bool> {
        self.would_overflow_at(now_seconds(), task_cost).await
    }

    /// Drip as of `now`, then report whether admitting `task_cost` would overflow.
    pub async fn would_overflow_at(&self, now: f64, task_cost: f64) -> Result<bool> {
        let volume = self.drip_at(now).await?;
        Ok(volume + task_cost > self.capacity)
    }

    /// Wait until `task_cost` fits into the bucket, then add it.
    ///
    /// Fails fast with `InvalidArgument` if the cost can never fit. Otherwise
    /// retries every `task_cost / rate_per_second` seconds until admitted.
    pub async fn acquire(&self, task_cost: f64) -> Result<()> {
        self.validate_cost(task_cost)?;

        let backoff = backoff_for(task_cost, self.rate.rate_per_second());
        let mut attempts: u64 = 0;

        loop {
            if self.try_admit(task_cost).await? {
                trace!(bucket = %self.id, cost = task_cost, attempts, "Admitted");
                return Ok(());
            }

            attempts += 1;
            if attempts == 1 {
                debug!(
                    bucket = %self.id,
                    cost = task_cost,
                    capacity = self.capacity,
                    backoff_ms = backoff.as_millis() as u64,
                    "Bucket full, waiting for it to drain"
                );
            } else {
                trace!(bucket = %self.id, attempts, "Bucket still full");
            }

            tokio::time::sleep(backoff).await;
        }
    }

    /// Check and increment in one step. Returns `false` if the bucket is full.
    async fn try_admit(&self, task_cost: f64) -> Result<bool> {
        let _guard = self.admission.lock().await;

        let volume = self.drip_at(now_seconds()).await?;
        if volume + task_cost > self.capacity {
            return Ok(false);
        }

        self.store.set_current_volume(&self.id, volume + task_cost).await?;
        Ok(true)
    }

    fn validate_cost(&self, task_cost: f64) -> Result<()> {
        if !task_cost.is_finite() || task_cost <= 0.0 {
            return Err(LimiterError::InvalidArgument(format!(
                "task cost must be a positive number, got {}",
                task_cost
            )));
        }
        if task_cost > self.capacity {
            return Err(LimiterError::InvalidArgument(format!(
                "cannot drip more than the capacity of {} for bucket {} (cost {})",
                self.capacity, self.id, task_cost
            )));
        }
        Ok(())
    }

    /// Release the store. Safe to call more than once; never fails.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(e) = self.store.teardown().await {
            let err = LimiterError::TeardownFailure(e.to_string());
            warn!(bucket = %self.id, error = %err, "Failed to release bucket store");
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }
}

/// Time for `task_cost` to drain at `rate_per_second`, saturating at `Duration::MAX`.
fn backoff_for(task_cost: f64, rate_per_second: f64) -> Duration {
    Duration::try_from_secs_f64(task_cost / rate_per_second).unwrap_or(Duration::MAX)
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("rate", &self.rate)
            .finish()
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Bucket {} - capacity: {}, rate: {}>", self.id, self.capacity, self.rate)
    }
}
