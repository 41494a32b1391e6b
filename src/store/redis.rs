use ::redis::aio::ConnectionManager;
use ::redis::{Client, IntoConnectionInfo, Script};
use async_trait::async_trait;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time;

use super::{CounterRecord, KeyValueStore, Ttl};
use crate::config::StoreConfig;
use crate::error::StoreError;

/// Deletes the lease only while it still carries the caller's token.
static RELEASE_SCRIPT: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#,
    )
});

#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    /// Connects using an explicit [`StoreConfig`]. The connection manager
    /// reconnects on its own after a dropped connection.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut info = config
            .connection_url()
            .into_connection_info()
            .map_err(|e| StoreError::Connection(format!("Invalid store address: {}", e)))?;
        info.redis.username = config.username.clone();
        info.redis.password = config.password.clone();

        let client = Client::open(info)
            .map_err(|e| StoreError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let manager = time::timeout(config.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(config.timeout))?
            .map_err(|e| StoreError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        tracing::debug!(address = %config.address, tls = config.tls, "Connected to Redis");

        Ok(Self {
            manager,
            timeout: config.timeout,
        })
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    // PX rejects 0
    duration.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let pong: String = self.bounded(::redis::cmd("PING").query_async(&mut conn)).await?;
        if pong != "PONG" {
            return Err(StoreError::Command(format!("unexpected PING reply: {}", pong)));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(::redis::cmd("GET").arg(key).query_async(&mut conn)).await
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = self
            .bounded(
                ::redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.manager.clone();
        self.bounded(::redis::cmd("DECR").arg(key).query_async(&mut conn)).await
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let mut conn = self.manager.clone();
        let pttl: i64 = self.bounded(::redis::cmd("PTTL").arg(key).query_async(&mut conn)).await?;
        Ok(Ttl::from_pttl(pttl))
    }

    async fn snapshot(&self, key: &str) -> Result<CounterRecord, StoreError> {
        let mut conn = self.manager.clone();
        let (remaining, pttl): (Option<i64>, i64) = self
            .bounded(
                ::redis::pipe()
                    .atomic()
                    .cmd("GET")
                    .arg(key)
                    .cmd("PTTL")
                    .arg(key)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(CounterRecord {
            remaining,
            ttl: Ttl::from_pttl(pttl),
        })
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .bounded(
                ::redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.manager.clone();
        let deleted: i64 = self
            .bounded(RELEASE_SCRIPT.key(key).arg(expected).invoke_async(&mut conn))
            .await?;
        Ok(deleted == 1)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_micros(500)), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_address() {
        let config = StoreConfig::new("not a valid address");
        assert!(matches!(
            RedisStore::connect(&config).await,
            Err(StoreError::Connection(_))
        ));
    }
}
