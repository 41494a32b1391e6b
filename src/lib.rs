//! Distributed fixed-window rate limiting.
//!
//! Each check reads and updates a counter in a shared store under a lease
//! scoped to the same scope and identity, so any number of processes enforce
//! one consistent limit.

pub mod backoff;
pub mod config;
pub mod config_validator;
pub mod context;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key;
pub mod lease;
pub mod limiter;
pub mod middleware;
pub mod policy;
pub mod response;
pub mod server;
pub mod store;

pub use config::{Config, LimiterOptions, StoreConfig};
pub use context::{CancelHandle, Context, ContextError};
pub use error::{LimiterError, Result, StoreError};
pub use key::RateLimitKey;
pub use lease::{Lease, LeaseGuard, LeaseManager};
pub use limiter::{CheckRequest, RateLimitResult, RateLimiter};
pub use server::create_app;
pub use store::{CounterRecord, KeyValueStore, MemoryStore, RedisStore, Ttl};
