//! Leaky bucket rate limiting: rates, buckets and the multi-bucket limiter.

mod backend;
mod bucket;
mod limiter;
mod rate;

pub use backend::{BucketStore, StoreFactory};
pub use bucket::{now_seconds, Bucket};
pub use limiter::{Limiter, DEFAULT_TASK_COST};
pub use rate::{Rate, TimeUnit};
