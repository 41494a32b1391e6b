//! Fixed-window decision engine.
//!
//! State per key is derived from the store on every call:
//!
//! | counter `v` | TTL        | state                     | action                         |
//! |-------------|------------|---------------------------|--------------------------------|
//! | `<= 0`      | none       | no window                 | start window at `max - 1`      |
//! | `<= 0`      | running    | window active, exhausted  | block until the TTL runs out   |
//! | `> 0`       | any        | window active             | decrement and allow            |
//!
//! The read-decide-write sequence is not atomic in the store. It runs under a
//! lease on the same scope and identity, which orders every check for that key.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::config::{LimiterOptions, StoreConfig};
use crate::config_validator::ConfigValidator;
use crate::context::Context;
use crate::error::{LimiterError, Result, StoreError};
use crate::key::RateLimitKey;
use crate::lease::LeaseManager;
use crate::store::{KeyValueStore, RedisStore};

/// One attempt to check against a fixed-window budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub scope: String,
    pub identity: String,
    pub max_attempts: u32,
    pub window: Duration,
}

impl CheckRequest {
    pub fn new(
        scope: impl Into<String>,
        identity: impl Into<String>,
        max_attempts: u32,
        window: Duration,
    ) -> Self {
        Self {
            scope: scope.into(),
            identity: identity.into(),
            max_attempts,
            window,
        }
    }

    /// Validates limits and key parts.
    pub fn key(&self) -> Result<RateLimitKey> {
        ConfigValidator::validate_limits(self.max_attempts, self.window)?;
        RateLimitKey::new(self.scope.as_str(), self.identity.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Never negative, whatever the stored counter says.
    pub attempts_remaining: u32,
    pub attempts_used: u32,
    /// Time until the window resets, at millisecond precision.
    pub retry_after: Duration,
    pub blocked: bool,
}

impl RateLimitResult {
    pub fn allowed(&self) -> bool {
        !self.blocked
    }
}

/// Truncates to whole milliseconds.
fn to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis().min(u64::MAX as u128) as u64)
}

pub struct RateLimiter<S> {
    store: Arc<S>,
    leases: LeaseManager<S>,
    options: LimiterOptions,
}

impl<S> Clone for RateLimiter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            leases: self.leases.clone(),
            options: self.options,
        }
    }
}

impl RateLimiter<RedisStore> {
    /// Connects to Redis and builds a limiter on top of it.
    pub async fn connect(store: &StoreConfig, options: LimiterOptions) -> Result<Self> {
        store.validate()?;
        options.validate_for_store(store)?;
        let redis = RedisStore::connect(store)
            .await
            .map_err(LimiterError::StoreUnavailable)?;
        Ok(Self::new(Arc::new(redis), options))
    }
}

impl<S: KeyValueStore + 'static> RateLimiter<S> {
    pub fn new(store: Arc<S>, options: LimiterOptions) -> Self {
        let leases = LeaseManager::new(Arc::clone(&store), &options);
        Self {
            store,
            leases,
            options,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn leases(&self) -> &LeaseManager<S> {
        &self.leases
    }

    pub fn options(&self) -> &LimiterOptions {
        &self.options
    }

    pub async fn is_store_available(&self) -> bool {
        self.store.ping().await.is_ok()
    }

    /// Decides whether this attempt is allowed and records it.
    ///
    /// The store is health-checked first; on failure no lease is taken and
    /// [`LimiterError::StoreUnavailable`] is returned. Lease acquisition is
    /// bounded by `ctx` and by [`LimiterOptions::lease_wait`]. Once acquired,
    /// the lease is released on every path out of this function, including
    /// the future being dropped.
    #[instrument(
        skip(self, ctx, request),
        fields(scope = %request.scope, identity = %request.identity, backend = self.store.backend())
    )]
    pub async fn check(&self, ctx: &Context, request: &CheckRequest) -> Result<RateLimitResult> {
        let key = request.key()?;

        ctx.run(self.store.ping())
            .await
            .map_err(|reason| LimiterError::LeaseTimeout {
                key: key.lease_key(),
                waited: Duration::ZERO,
                reason,
            })?
            .map_err(LimiterError::StoreUnavailable)?;

        let acquire_ctx = ctx
            .clone()
            .with_deadline(tokio::time::Instant::now() + self.options.lease_wait);
        let guard = self.leases.acquire_guard(&acquire_ctx, &key.lease_key()).await?;
        let decision = self.decide(ctx, &key, request).await;
        let released = guard.release().await;

        match (decision, released) {
            (Ok(result), Ok(())) => {
                debug!(
                    blocked = result.blocked,
                    remaining = result.attempts_remaining,
                    retry_after_ms = result.retry_after.as_millis() as u64,
                    "Rate limit decided"
                );
                Ok(result)
            }
            (Ok(_), Err(release_err)) => Err(release_err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(release_err)) => {
                warn!(error = %release_err, "Lease release failed after a failed decision");
                Err(err)
            }
        }
    }

    async fn decide(
        &self,
        ctx: &Context,
        key: &RateLimitKey,
        request: &CheckRequest,
    ) -> Result<RateLimitResult> {
        let counter_key = key.counter_key();
        let max_attempts = request.max_attempts;

        let record = self
            .guarded(ctx, self.store.snapshot(&counter_key))
            .await?
            .map_err(LimiterError::StoreUnavailable)?;
        let current = record.remaining.unwrap_or(0);

        if current <= 0 && record.ttl.is_unbounded() {
            self.guarded(
                ctx,
                self.store
                    .set_with_expiry(&counter_key, i64::from(max_attempts) - 1, request.window),
            )
            .await?
            .map_err(LimiterError::StoreWrite)?;

            debug!(key = %counter_key, "Window started");
            return Ok(RateLimitResult {
                attempts_remaining: max_attempts - 1,
                attempts_used: 1,
                retry_after: to_millis(request.window),
                blocked: false,
            });
        }

        if current <= 0 {
            return Ok(RateLimitResult {
                attempts_remaining: 0,
                attempts_used: max_attempts,
                retry_after: to_millis(record.ttl.remaining()),
                blocked: true,
            });
        }

        let left = self
            .guarded(ctx, self.store.decrement(&counter_key))
            .await?
            .map_err(LimiterError::StoreWrite)?;
        if left < 0 {
            debug!(key = %counter_key, stored = left, "Counter below zero");
        }

        let attempts_remaining = u32::try_from(left.max(0)).unwrap_or(u32::MAX);
        Ok(RateLimitResult {
            attempts_remaining,
            attempts_used: max_attempts.saturating_sub(attempts_remaining),
            retry_after: to_millis(record.ttl.remaining()),
            blocked: false,
        })
    }

    /// Runs a store call under `ctx`; a finished context is a cancellation
    /// of the decision phase.
    async fn guarded<T, F>(
        &self,
        ctx: &Context,
        fut: F,
    ) -> Result<std::result::Result<T, StoreError>>
    where
        F: std::future::Future<Output = std::result::Result<T, StoreError>>,
    {
        ctx.run(fut).await.map_err(LimiterError::Cancelled)
    }
}
