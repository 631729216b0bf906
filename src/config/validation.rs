//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GateConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid socket address `{value}`")]
    BadAddress { field: &'static str, value: String },

    #[error("upstream.url: {0}")]
    BadUpstream(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("lockout.base_minutes ({base}) exceeds lockout.max_minutes ({max})")]
    LockoutBounds { base: u64, max: u64 },

    #[error("throttle.hourly_limit ({hourly}) exceeds throttle.daily_limit ({daily})")]
    ThrottleBounds { hourly: u64, daily: u64 },

    #[error("detection.max_payload_bytes exceeds detection.max_buffer_bytes")]
    BufferTooSmall,

    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Check a configuration for semantic errors.
pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::Empty("admin.api_key"));
        }
    }
    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    match Url::parse(&config.upstream.url) {
        Ok(url) if url.scheme() != "http" => errors.push(ValidationError::BadUpstream(
            format!("unsupported scheme `{}`", url.scheme()),
        )),
        Ok(url) if url.host_str().is_none() => {
            errors.push(ValidationError::BadUpstream("missing host".to_string()))
        }
        Ok(_) => {}
        Err(e) => errors.push(ValidationError::BadUpstream(e.to_string())),
    }

    let positive: [(&'static str, u64); 11] = [
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
        ("resilience.store_timeout_ms", config.resilience.store_timeout_ms),
        ("store.sweep_interval_secs", config.store.sweep_interval_secs),
        ("csrf.token_ttl_secs", config.csrf.token_ttl_secs),
        ("lockout.max_attempts", config.lockout.max_attempts as u64),
        ("lockout.base_minutes", config.lockout.base_minutes),
        ("lockout.state_ttl_secs", config.lockout.state_ttl_secs),
        ("throttle.hourly_limit", config.throttle.hourly_limit),
        ("throttle.daily_limit", config.throttle.daily_limit),
        ("detection.max_suspicious_score", config.detection.max_suspicious_score as u64),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    if config.lockout.base_minutes > config.lockout.max_minutes {
        errors.push(ValidationError::LockoutBounds {
            base: config.lockout.base_minutes,
            max: config.lockout.max_minutes,
        });
    }
    if config.throttle.hourly_limit > config.throttle.daily_limit {
        errors.push(ValidationError::ThrottleBounds {
            hourly: config.throttle.hourly_limit,
            daily: config.throttle.daily_limit,
        });
    }
    if config.detection.max_payload_bytes > config.detection.max_buffer_bytes {
        errors.push(ValidationError::BufferTooSmall);
    }
    if config.csrf.enabled && config.csrf.header_name.is_empty() {
        errors.push(ValidationError::Empty("csrf.header_name"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadAddress {
            field,
            value: value.to_string(),
        });
    }
}
