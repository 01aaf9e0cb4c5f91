//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals and timeouts > 0)
//! - Check the heartbeat request and metrics address are usable
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ResilienceConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ResilienceConfig;
use crate::connection::Dn;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let heartbeat = &config.heartbeat;
    if heartbeat.enabled {
        if heartbeat.interval_ms == 0 {
            errors.push(ValidationError::new("heartbeat.interval_ms", "must be greater than 0"));
        }
        if heartbeat.timeout_ms == 0 {
            errors.push(ValidationError::new("heartbeat.timeout_ms", "must be greater than 0"));
        }
        if Dn::parse(&heartbeat.base_dn).is_none() {
            errors.push(ValidationError::new(
                "heartbeat.base_dn",
                format!("'{}' is not a valid DN", heartbeat.base_dn),
            ));
        }
        let filter = heartbeat.filter.trim();
        if !(filter.starts_with('(') && filter.ends_with(')')) {
            errors.push(ValidationError::new(
                "heartbeat.filter",
                "must be a parenthesized search filter",
            ));
        }
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
