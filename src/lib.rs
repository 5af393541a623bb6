//! Drip Limiter - Leaky Bucket Rate Limiting
//!
//! This crate throttles callers with one or more leaky buckets. Each bucket
//! fills on every admitted unit of work and drains continuously at a fixed
//! rate; callers wait while admitting them would overflow any bucket. Bucket
//! state can live in process memory, Redis or SQLite, so a limit can be
//! shared across processes and machines.

pub mod blocking;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod storage;

pub use error::{LimiterError, Result};
pub use ratelimit::{Bucket, BucketStore, Limiter, Rate, StoreFactory, TimeUnit};
pub use storage::StoreConfig;
