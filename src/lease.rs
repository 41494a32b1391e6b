//! Time-bounded exclusive leases held in the shared store.
//!
//! A lease is a store key holding a random token with an expiry. Claiming it
//! is `SET NX PX`; releasing it is a compare-and-delete on the token, so a
//! caller whose lease already expired can never remove the next holder's.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backoff::AcquireBackoff;
use crate::config::LimiterOptions;
use crate::context::Context;
use crate::error::{LimiterError, Result, StoreError};
use crate::store::KeyValueStore;

/// A claimed lease. Only lives in the store; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    key: String,
    token: String,
    expiry: Duration,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }
}

pub struct LeaseManager<S> {
    store: Arc<S>,
    lease_duration: Duration,
    release_timeout: Duration,
    backoff: AcquireBackoff,
}

impl<S> Clone for LeaseManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            lease_duration: self.lease_duration,
            release_timeout: self.release_timeout,
            backoff: self.backoff,
        }
    }
}

impl<S: KeyValueStore + 'static> LeaseManager<S> {
    pub fn new(store: Arc<S>, options: &LimiterOptions) -> Self {
        Self {
            store,
            lease_duration: options.lease_duration,
            release_timeout: options.release_timeout,
            backoff: options.backoff,
        }
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Claims the lease at `key`, backing off while another owner holds it.
    ///
    /// Gives up with [`LimiterError::LeaseTimeout`] once `ctx` is done. A ctx
    /// without deadline or cancellation waits until the lease frees up.
    pub async fn acquire(&self, ctx: &Context, key: &str) -> Result<Lease> {
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let timed_out = |reason| LimiterError::LeaseTimeout {
            key: key.to_string(),
            waited: started.elapsed(),
            reason,
        };

        let mut attempt: u32 = 0;
        loop {
            let claimed = ctx
                .run(self.store.set_if_absent(key, &token, self.lease_duration))
                .await
                .map_err(timed_out)?
                .map_err(LimiterError::StoreUnavailable)?;

            if claimed {
                debug!(lease = %key, attempts = attempt + 1, "Lease acquired");
                return Ok(Lease {
                    key: key.to_string(),
                    token,
                    expiry: self.lease_duration,
                });
            }

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.jittered(attempt);
            trace!(
                lease = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Lease held elsewhere, backing off"
            );
            ctx.run(tokio::time::sleep(delay)).await.map_err(timed_out)?;
        }
    }

    /// Releases `lease` if the store still holds its token.
    ///
    /// Returns `false` when the lease had already expired or moved to another
    /// owner; that is not an error and leaves the other owner untouched.
    pub async fn release(&self, ctx: &Context, lease: &Lease) -> Result<bool> {
        let released = ctx
            .run(self.store.delete_if_equals(&lease.key, &lease.token))
            .await
            .map_err(LimiterError::Cancelled)?
            .map_err(LimiterError::StoreUnavailable)?;

        if released {
            trace!(lease = %lease.key, "Lease released");
        } else {
            debug!(lease = %lease.key, "Lease was no longer ours at release");
        }
        Ok(released)
    }

    /// Claims a lease that is released when the guard is released or dropped.
    pub async fn acquire_guard(&self, ctx: &Context, key: &str) -> Result<LeaseGuard<S>> {
        let lease = self.acquire(ctx, key).await?;
        Ok(LeaseGuard {
            manager: self.clone(),
            lease: Some(lease),
        })
    }
}

/// Holds a lease until [`LeaseGuard::release`] or drop.
///
/// Release uses its own bounded context, so it still runs after the caller's
/// context was cancelled. Dropping an unreleased guard (for instance when the
/// owning future is dropped mid-check) hands the release to a spawned task.
pub struct LeaseGuard<S: KeyValueStore + 'static> {
    manager: LeaseManager<S>,
    lease: Option<Lease>,
}

impl<S: KeyValueStore + 'static> LeaseGuard<S> {
    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    /// The lease stays in the guard until the round trip finishes, so
    /// dropping this future midway still hands the release to [`Drop`].
    pub async fn release(mut self) -> Result<()> {
        let Some(lease) = self.lease.as_ref() else {
            return Ok(());
        };
        let ctx = Context::with_timeout(self.manager.release_timeout);
        let released = self.manager.release(&ctx, lease).await;
        self.lease = None;
        match released {
            Ok(_) => Ok(()),
            Err(LimiterError::Cancelled(_)) => Err(LimiterError::StoreUnavailable(
                StoreError::Timeout(self.manager.release_timeout),
            )),
            Err(err) => Err(err),
        }
    }
}

impl<S: KeyValueStore + 'static> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let manager = self.manager.clone();
                handle.spawn(async move {
                    let ctx = Context::with_timeout(manager.release_timeout);
                    if let Err(err) = manager.release(&ctx, &lease).await {
                        warn!(lease = %lease.key, error = %err, "Deferred lease release failed");
                    }
                });
            }
            Err(_) => {
                warn!(lease = %lease.key, "No runtime to release lease; it will expire on its own");
            }
        }
    }
}
