//! Key-value store adapters.
//!
//! The limiter only needs a handful of operations, each atomic on its own.
//! Nothing here is atomic across calls; that guarantee comes from the lease.
//!
//! - **Redis**: the shared store for multi-process deployments
//! - **Memory**: in-process store with the same semantics, for tests and single instances

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// Remaining lifetime of a key, mirroring the `PTTL` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Expires(Duration),
    /// The key exists without an expiry (`-1`).
    Persistent,
    /// The key does not exist (`-2`).
    Missing,
}

impl Ttl {
    pub fn from_pttl(millis: i64) -> Self {
        match millis {
            -1 => Ttl::Persistent,
            m if m < 0 => Ttl::Missing,
            m => Ttl::Expires(Duration::from_millis(m as u64)),
        }
    }

    /// True when no window is running for the key.
    pub fn is_unbounded(&self) -> bool {
        !matches!(self, Ttl::Expires(_))
    }

    pub fn remaining(&self) -> Duration {
        match self {
            Ttl::Expires(remaining) => *remaining,
            Ttl::Persistent | Ttl::Missing => Duration::ZERO,
        }
    }
}

/// Counter value and TTL as read from the store.
///
/// `remaining` may be negative: concurrent decrements outside the lease are
/// allowed to overshoot and the sign is kept for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterRecord {
    pub remaining: Option<i64>,
    pub ttl: Ttl,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Health check.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Writes `value` and starts its expiry in the same command.
    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically decrements and returns the new value. An absent key is
    /// treated as `0`, leaving `-1` without an expiry.
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;

    async fn remaining_ttl(&self, key: &str) -> Result<Ttl, StoreError>;

    /// Reads value and TTL. Adapters should override this with a single
    /// atomic read; the default issues two separate ones.
    async fn snapshot(&self, key: &str) -> Result<CounterRecord, StoreError> {
        let remaining = self.get(key).await?;
        let ttl = self.remaining_ttl(key).await?;
        Ok(CounterRecord { remaining, ttl })
    }

    /// Writes `value` with an expiry only if `key` is absent. Returns whether
    /// the write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Deletes `key` only if it currently holds `expected`. Returns whether
    /// the delete happened.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pttl_sentinels() {
        assert_eq!(Ttl::from_pttl(-2), Ttl::Missing);
        assert_eq!(Ttl::from_pttl(-1), Ttl::Persistent);
        assert_eq!(Ttl::from_pttl(1500), Ttl::Expires(Duration::from_millis(1500)));
        assert_eq!(Ttl::from_pttl(0), Ttl::Expires(Duration::ZERO));
    }

    #[test]
    fn test_unbounded() {
        assert!(Ttl::Missing.is_unbounded());
        assert!(Ttl::Persistent.is_unbounded());
        assert!(!Ttl::Expires(Duration::from_secs(1)).is_unbounded());
        assert_eq!(Ttl::Persistent.remaining(), Duration::ZERO);
    }
}
