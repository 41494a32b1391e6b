use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::config_validator::ConfigValidator;
use crate::error::LimiterError;

/// Fixed-window budget for one scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Default for ScopePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(60),
        }
    }
}

impl ScopePolicy {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        ConfigValidator::validate_limits(self.max_attempts, self.window)
    }
}

/// Policies per scope, e.g. `login` or `signup`, with a fallback.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolicyConfig {
    pub scopes: HashMap<String, ScopePolicy>,
    pub default_policy: ScopePolicy,
}

/// On-disk shape of a policy file.
///
/// ```json
/// {
///   "default_policy": { "max_attempts": 10, "window": "1m" },
///   "scopes": { "login": { "max_attempts": 3, "window": "15m" } }
/// }
/// ```
#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    scopes: HashMap<String, ScopePolicy>,
    default_policy: Option<ScopePolicy>,
}

impl PolicyConfig {
    pub fn with_default(default_policy: ScopePolicy) -> Self {
        Self {
            scopes: HashMap::new(),
            default_policy,
        }
    }

    /// Parses a policy file; `fallback` applies when it sets no default.
    pub fn from_json(raw: &str, fallback: ScopePolicy) -> Result<Self, LimiterError> {
        let file: PolicyFile = serde_json::from_str(raw)
            .map_err(|e| LimiterError::Configuration(format!("Invalid policy file: {}", e)))?;
        let config = PolicyConfig {
            scopes: file.scopes,
            default_policy: file.default_policy.unwrap_or(fallback),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>, fallback: ScopePolicy) -> Result<Self, LimiterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LimiterError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw, fallback)
    }

    /// Get the policy for a scope, falling back to the default
    pub fn get_policy(&self, scope: &str) -> ScopePolicy {
        self.scopes.get(scope).copied().unwrap_or(self.default_policy)
    }

    pub fn set_policy(&mut self, scope: impl Into<String>, policy: ScopePolicy) {
        self.scopes.insert(scope.into(), policy);
    }

    pub fn validate(&self) -> Result<(), LimiterError> {
        self.default_policy.validate()?;
        for (scope, policy) in &self.scopes {
            policy.validate().map_err(|e| {
                LimiterError::Configuration(format!("Policy for scope '{}': {}", scope, e))
            })?;
        }
        Ok(())
    }
}
