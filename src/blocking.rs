//! Blocking wrapper for synchronous callers.
//!
//! The async [`Limiter`](crate::ratelimit::Limiter) is driven on a private
//! current-thread runtime, so code without a tokio runtime of its own can
//! throttle plain function calls. The wrapper releases every bucket store
//! when dropped.
//!
//! Do not create this from inside an async runtime; use the async limiter
//! there. Dropping it inside one is fine: teardown then runs on a scoped
//! helper thread.

use std::fmt;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::ratelimit::{self, Rate, StoreFactory, DEFAULT_TASK_COST};

/// A limiter whose operations block the calling thread.
pub struct Limiter {
    inner: ratelimit::Limiter,
    /// Only `None` while being dropped
    runtime: Option<Runtime>,
}

impl Limiter {
    /// Create a blocking limiter with one bucket per rate.
    pub fn new<F>(
        identifier: impl Into<String>,
        rates: impl IntoIterator<Item = Rate>,
        factory: &F,
    ) -> Result<Self>
    where
        F: StoreFactory + ?Sized,
    {
        let runtime = build_runtime()?;
        let inner = runtime.block_on(ratelimit::Limiter::new(identifier, rates, factory))?;
        Ok(Self {
            inner,
            runtime: Some(runtime),
        })
    }

    /// Create a blocking limiter from a loaded configuration.
    pub fn from_config(config: &LimiterConfig) -> Result<Self> {
        let runtime = build_runtime()?;
        let inner = runtime.block_on(ratelimit::Limiter::from_config(config))?;
        Ok(Self {
            inner,
            runtime: Some(runtime),
        })
    }

    /// Block until every bucket admits `task_cost`.
    pub fn acquire(&self, task_cost: f64) -> Result<()> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            LimiterError::InvalidArgument("the blocking limiter has been shut down".to_string())
        })?;
        runtime.block_on(self.inner.acquire(task_cost))
    }

    /// Acquire one unit, then call `work`.
    pub fn throttle<T>(&self, work: impl FnOnce() -> T) -> Result<T> {
        self.acquire(DEFAULT_TASK_COST)?;
        Ok(work())
    }

    /// The wrapped async limiter.
    pub fn inner(&self) -> &ratelimit::Limiter {
        &self.inner
    }

    /// Release every bucket store. Also done on drop.
    pub fn teardown(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.block_on(self.inner.teardown());
        }
    }
}

impl Drop for Limiter {
    fn drop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };

        // block_on and dropping a runtime both panic on a runtime thread
        if Handle::try_current().is_ok() {
            let inner = &self.inner;
            std::thread::scope(|scope| {
                scope.spawn(move || {
                    runtime.block_on(inner.teardown());
                    drop(runtime);
                });
            });
        } else {
            runtime.block_on(self.inner.teardown());
        }
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("blocking::Limiter")
            .field("inner", &self.inner)
            .finish()
    }
}

impl fmt::Display for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

fn build_runtime() -> Result<Runtime> {
    if Handle::try_current().is_ok() {
        return Err(LimiterError::InvalidArgument(
            "the blocking limiter cannot be created inside an async runtime".to_string(),
        ));
    }
    Ok(Builder::new_current_thread().enable_all().build()?)
}
