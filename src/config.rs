use envconfig::Envconfig;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::backoff::AcquireBackoff;
use crate::config_validator::ConfigValidator;
use crate::error::LimiterError;
use crate::policy::ScopePolicy;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Store address as host:port
    #[envconfig(from = "STORE_ADDRESS", default = "127.0.0.1:6379")]
    pub store_address: String,

    #[envconfig(from = "STORE_USERNAME")]
    pub store_username: Option<String>,

    #[envconfig(from = "STORE_PASSWORD")]
    pub store_password: Option<String>,

    #[envconfig(from = "STORE_DATABASE", default = "0")]
    pub store_database: i64,

    /// Per round trip timeout in milliseconds
    #[envconfig(from = "STORE_TIMEOUT_MS", default = "500")]
    pub store_timeout_ms: u64,

    #[envconfig(from = "STORE_TLS", default = "false")]
    pub store_tls: bool,

    /// Lifetime of a lease; must exceed the worst-case decision latency
    #[envconfig(from = "LEASE_DURATION_MS", default = "2000")]
    pub lease_duration_ms: u64,

    /// How long a check waits for a contended lease
    #[envconfig(from = "LEASE_WAIT_MS", default = "5000")]
    pub lease_wait_ms: u64,

    #[envconfig(from = "DEFAULT_MAX_ATTEMPTS", default = "5")]
    pub default_max_attempts: u32,

    #[envconfig(from = "DEFAULT_WINDOW_MS", default = "60000")]
    pub default_window_ms: u64,

    /// Optional JSON file with per-scope policies
    #[envconfig(from = "POLICY_FILE")]
    pub policy_file: Option<String>,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load and validate configuration from environment variables
    pub fn from_env() -> Result<Self, LimiterError> {
        let config = Config::init_from_env()
            .map_err(|e| LimiterError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        let store = self.store_config();
        store.validate()?;
        self.limiter_options().validate_for_store(&store)?;
        self.default_policy().validate()?;
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            address: self.store_address.clone(),
            username: self.store_username.clone(),
            password: self.store_password.clone(),
            database: self.store_database,
            timeout: Duration::from_millis(self.store_timeout_ms),
            tls: self.store_tls,
        }
    }

    pub fn limiter_options(&self) -> LimiterOptions {
        LimiterOptions {
            lease_duration: Duration::from_millis(self.lease_duration_ms),
            lease_wait: Duration::from_millis(self.lease_wait_ms),
            release_timeout: Duration::from_millis(self.store_timeout_ms),
            ..LimiterOptions::default()
        }
    }

    pub fn default_policy(&self) -> ScopePolicy {
        ScopePolicy::new(
            self.default_max_attempts,
            Duration::from_millis(self.default_window_ms),
        )
    }
}

/// Connection options for the shared store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `host:port`
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: i64,
    /// Bound on connecting and on every round trip.
    pub timeout: Duration,
    pub tls: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            username: None,
            password: None,
            database: 0,
            timeout: Duration::from_millis(500),
            tls: false,
        }
    }
}

impl StoreConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(
        mut self,
        username: Option<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username;
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: i64) -> Self {
        self.database = database;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        ConfigValidator::validate_store_address(&self.address)?;
        if self.database < 0 {
            return Err(LimiterError::Configuration(
                "Store database index cannot be negative".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(LimiterError::Configuration(
                "Store timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection URL without credentials; those are applied separately so
    /// they never need escaping.
    pub fn connection_url(&self) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{}://{}/{}", scheme, self.address, self.database)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Timing of the lease protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterOptions {
    /// Lifetime of a claimed lease.
    pub lease_duration: Duration,
    /// Upper bound on waiting for a lease when the caller's context has a
    /// later deadline or none at all.
    pub lease_wait: Duration,
    /// Bound on the release round trip, which runs even after the caller's
    /// context is done.
    pub release_timeout: Duration,
    pub backoff: AcquireBackoff,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(2),
            lease_wait: Duration::from_secs(5),
            release_timeout: Duration::from_millis(500),
            backoff: AcquireBackoff::default(),
        }
    }
}

impl LimiterOptions {
    pub fn validate(&self) -> Result<(), LimiterError> {
        ConfigValidator::validate_lease_timing(
            self.lease_duration,
            self.lease_wait,
            self.release_timeout,
        )
    }

    /// Like [`validate`](Self::validate), but also bounds the lease by the
    /// store's per-call timeout, which governs every round trip but the release.
    pub fn validate_for_store(&self, store: &StoreConfig) -> Result<(), LimiterError> {
        ConfigValidator::validate_lease_timing(
            self.lease_duration,
            self.lease_wait,
            self.release_timeout.max(store.timeout),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_env() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:3000".parse().unwrap());
        assert_eq!(config.store_address, "127.0.0.1:6379");
        assert_eq!(config.store_password, None);
        assert_eq!(config.lease_duration_ms, 2000);
        assert!(config.validate().is_ok());

        let options = config.limiter_options();
        assert_eq!(options.lease_duration, Duration::from_secs(2));
        assert_eq!(options.release_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_overrides_from_env() {
        let mut env = HashMap::new();
        env.insert("STORE_ADDRESS".to_string(), "cache.internal:6380".to_string());
        env.insert("STORE_PASSWORD".to_string(), "s3cret".to_string());
        env.insert("STORE_TLS".to_string(), "true".to_string());
        env.insert("DEFAULT_MAX_ATTEMPTS".to_string(), "3".to_string());

        let config = Config::init_from_hashmap(&env).unwrap();
        let store = config.store_config();
        assert_eq!(store.connection_url(), "rediss://cache.internal:6380/0");
        assert_eq!(store.password.as_deref(), Some("s3cret"));
        assert_eq!(config.default_policy().max_attempts, 3);
    }

    #[test]
    fn test_lease_shorter_than_store_timeout_rejected() {
        let mut env = HashMap::new();
        env.insert("STORE_TIMEOUT_MS".to_string(), "3000".to_string());
        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_must_outlive_decision_round_trips() {
        let mut env = HashMap::new();
        env.insert("STORE_TIMEOUT_MS".to_string(), "700".to_string());
        let config = Config::init_from_hashmap(&env).unwrap();
        assert!(matches!(config.validate(), Err(LimiterError::Configuration(_))));

        let options = LimiterOptions {
            lease_duration: Duration::from_millis(600),
            release_timeout: Duration::from_millis(500),
            ..LimiterOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_slow_store_rejected_against_default_options() {
        let store = StoreConfig::new("localhost:6379").with_timeout(Duration::from_secs(5));
        let options = LimiterOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.validate_for_store(&store).is_err());
        assert!(options.validate_for_store(&StoreConfig::default()).is_ok());
    }

    #[test]
    fn test_store_config_validation() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::new("localhost").validate().is_err());
        assert!(StoreConfig::new("localhost:6379").with_database(-1).validate().is_err());
        assert!(StoreConfig::new("localhost:6379")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = StoreConfig::new("localhost:6379").with_credentials(None, "hunter2");
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
