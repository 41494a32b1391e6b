use std::time::Duration;

use crate::error::LimiterError;

/// Store round trips made while a lease is held: the snapshot read, the set
/// or decrement, and the release.
pub const LEASE_ROUND_TRIPS: u32 = 3;

/// Validates configuration values for consistency and correctness
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates a store address in host:port form
    pub fn validate_store_address(address: &str) -> Result<(), LimiterError> {
        if address.is_empty() {
            return Err(LimiterError::Configuration(
                "Store address cannot be empty".to_string(),
            ));
        }

        if address.contains("://") {
            return Err(LimiterError::Configuration(
                "Store address must be host:port, not a URL; use STORE_TLS for rediss".to_string(),
            ));
        }

        let (host, port) = address.rsplit_once(':').ok_or_else(|| {
            LimiterError::Configuration("Store address must be in host:port format".to_string())
        })?;

        if host.is_empty() {
            return Err(LimiterError::Configuration(
                "Store host cannot be empty".to_string(),
            ));
        }

        match port.parse::<u16>() {
            Ok(0) | Err(_) => Err(LimiterError::Configuration(format!(
                "Invalid store port '{}'",
                port
            ))),
            Ok(_) => Ok(()),
        }
    }

    /// Validates fixed-window limits
    pub fn validate_limits(max_attempts: u32, window: Duration) -> Result<(), LimiterError> {
        if max_attempts == 0 {
            return Err(LimiterError::Validation(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if window.as_millis() == 0 {
            return Err(LimiterError::Validation(
                "window must be at least 1ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates lease timing. `round_trip_timeout` is the longest a single
    /// store call may take; the lease must outlive [`LEASE_ROUND_TRIPS`] of
    /// them, otherwise a second caller can claim it while the first still
    /// writes.
    pub fn validate_lease_timing(
        lease_duration: Duration,
        lease_wait: Duration,
        round_trip_timeout: Duration,
    ) -> Result<(), LimiterError> {
        if lease_duration.as_millis() == 0 {
            return Err(LimiterError::Configuration(
                "Lease duration must be at least 1ms".to_string(),
            ));
        }

        if lease_wait.is_zero() {
            return Err(LimiterError::Configuration(
                "Lease wait must be greater than 0".to_string(),
            ));
        }

        if round_trip_timeout.is_zero() {
            return Err(LimiterError::Configuration(
                "Store timeout must be greater than 0".to_string(),
            ));
        }

        let held_for = round_trip_timeout.saturating_mul(LEASE_ROUND_TRIPS);
        if lease_duration <= held_for {
            return Err(LimiterError::Configuration(format!(
                "Lease duration ({:?}) must exceed {} store round trips ({:?})",
                lease_duration, LEASE_ROUND_TRIPS, held_for
            )));
        }

        Ok(())
    }
}
