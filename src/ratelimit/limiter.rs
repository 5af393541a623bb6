//! Core rate limiter implementation.

use std::fmt;
use std::future::Future;

use tracing::{debug, info, trace};

use super::backend::StoreFactory;
use super::bucket::Bucket;
use super::rate::Rate;
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};

/// Default cost of one unit of work.
pub const DEFAULT_TASK_COST: f64 = 1.0;

/// A rate limiter that gates work behind one or more rate ceilings.
///
/// Each rate gets its own bucket. Buckets are ordered by time unit and then
/// capacity, so the finest-grained ceiling is checked first and the coarsest
/// last. Admission by an earlier bucket is not rolled back while a later one
/// blocks.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct Limiter {
    /// Namespace for all bucket ids
    identifier: String,
    /// Buckets in the order they are checked
    buckets: Vec<Bucket>,
}

impl Limiter {
    /// Create a limiter with one bucket per rate, each opened through `factory`.
    pub async fn new<F>(
        identifier: impl Into<String>,
        rates: impl IntoIterator<Item = Rate>,
        factory: &F,
    ) -> Result<Self>
    where
        F: StoreFactory + ?Sized,
    {
        let identifier = identifier.into();
        let rates = sort_rates(rates);

        if rates.is_empty() {
            return Err(LimiterError::InvalidArgument(format!(
                "limiter {} needs at least one rate",
                identifier
            )));
        }

        let mut buckets = Vec::with_capacity(rates.len());
        for (index, rate) in rates.into_iter().enumerate() {
            let id = format!("{}:{}", identifier, index);
            let store = factory.open(&id, rate.capacity()).await?;
            debug!(
                bucket = %id,
                capacity = rate.capacity(),
                rate_per_second = rate.rate_per_second(),
                "Creating bucket"
            );
            buckets.push(Bucket::new(id, rate, store));
        }

        info!(identifier = %identifier, buckets = buckets.len(), "Limiter initialized");

        Ok(Self { identifier, buckets })
    }

    /// Create a limiter from a loaded configuration.
    pub async fn from_config(config: &LimiterConfig) -> Result<Self> {
        let rates = config.rates()?;
        Self::new(config.identifier.clone(), rates, &config.store).await
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Buckets in the order `acquire` checks them.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Wait until every bucket admits `task_cost`.
    ///
    /// Costs larger than any bucket's capacity are rejected before any
    /// bucket is touched.
    pub async fn acquire(&self, task_cost: f64) -> Result<()> {
        if let Some(bucket) = self.buckets.iter().find(|b| task_cost > b.capacity()) {
            return Err(LimiterError::InvalidArgument(format!(
                "task cost {} exceeds the capacity of {} for bucket {}",
                task_cost,
                bucket.capacity(),
                bucket.id()
            )));
        }

        trace!(identifier = %self.identifier, cost = task_cost, "Acquiring");
        for bucket in &self.buckets {
            bucket.acquire(task_cost).await?;
        }
        Ok(())
    }

    /// Acquire one unit, then run `work`.
    pub async fn throttle<Fut>(&self, work: Fut) -> Result<Fut::Output>
    where
        Fut: Future,
    {
        self.acquire(DEFAULT_TASK_COST).await?;
        Ok(work.await)
    }

    /// Release every bucket's store, continuing past individual failures.
    pub async fn teardown(&self) {
        for bucket in &self.buckets {
            bucket.teardown().await;
        }
        debug!(identifier = %self.identifier, "Limiter torn down");
    }

    /// Tear down and drop the limiter.
    pub async fn close(self) {
        self.teardown().await;
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("identifier", &self.identifier)
            .field("buckets", &self.buckets)
            .finish()
    }
}

impl fmt::Display for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Limiter - {}:", self.identifier)?;
        for bucket in &self.buckets {
            write!(f, "\n\t{}", bucket)?;
        }
        write!(f, "\n>")
    }
}

/// Stable sort by time unit, then effective capacity.
fn sort_rates(rates: impl IntoIterator<Item = Rate>) -> Vec<Rate> {
    let mut rates: Vec<Rate> = rates.into_iter().collect();
    rates.sort_by(|a, b| a.cmp_for_limiter(b));
    rates
}
