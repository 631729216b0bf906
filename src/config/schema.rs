//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the defense gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GateConfig {
    /// Listener configuration (bind address, client IP trust).
    pub listener: ListenerConfig,

    /// Application the gateway protects.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Store deadlines and degradation policy.
    pub resilience: ResilienceConfig,

    /// In-process store housekeeping.
    pub store: StoreConfig,

    /// Attack signature scoring and blocking.
    pub detection: DetectionConfig,

    /// Anti-forgery token protocol.
    pub csrf: CsrfConfig,

    /// Per-identity lockout.
    pub lockout: LockoutConfig,

    /// Per-IP failure throttling.
    pub throttle: ThrottleConfig,

    /// CAPTCHA escalation.
    pub captcha: CaptchaConfig,

    /// Authentication endpoints observed by the gateway.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Take the client IP from the first X-Forwarded-For hop.
    /// Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trust_forwarded_for: false,
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are forwarded to (e.g., "http://127.0.0.1:3000").
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:3000".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,

    /// Upstream response timeout in seconds.
    pub upstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_secs: 25,
        }
    }
}

/// What the gate does when the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log, count, and treat the failed lookup as "no signal".
    #[default]
    Open,
    /// Reject the request with 503.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Deadline for a single store call in milliseconds.
    pub store_timeout_ms: u64,

    pub failure_policy: FailurePolicy,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 50,
            failure_policy: FailurePolicy::Open,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How often expired keys are purged, in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
        }
    }
}

/// Attack signature scoring configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Master switch for score-based blocking.
    pub suspicious_activity: bool,
    pub sql_injection: bool,
    pub xss: bool,
    pub path_traversal: bool,
    pub user_agent: bool,
    pub payload_size: bool,

    /// Block once a request's total score reaches `max_suspicious_score`.
    pub block_suspicious: bool,
    pub max_suspicious_score: u32,

    /// Bodies or content-length above this are flagged (bytes).
    pub max_payload_bytes: usize,

    /// Hard ceiling for buffering a body before inspection (bytes).
    pub max_buffer_bytes: usize,

    /// How long an IP stays on the fast-path block list after a score block.
    pub suspicious_ip_ttl_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            suspicious_activity: true,
            sql_injection: true,
            xss: true,
            path_traversal: true,
            user_agent: true,
            payload_size: true,
            block_suspicious: true,
            max_suspicious_score: 50,
            max_payload_bytes: 5 * 1024 * 1024, // 5MB
            max_buffer_bytes: 10 * 1024 * 1024,
            suspicious_ip_ttl_secs: 3600,
        }
    }
}

/// Anti-forgery token configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub enabled: bool,

    /// Reject mutating requests with a bad token instead of scoring them.
    pub block_on_failure: bool,

    /// Score added when the token is missing or invalid.
    pub missing_weight: u32,

    /// Token validity window in seconds.
    pub token_ttl_secs: u64,

    pub header_name: String,
    pub session_header: String,
    pub session_cookie: String,

    /// Path prefixes that never require a token.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_on_failure: false,
            missing_weight: 25,
            token_ttl_secs: 3600,
            header_name: "x-csrf-token".to_string(),
            session_header: "x-session-id".to_string(),
            session_cookie: "session_id".to_string(),
            exempt_paths: vec!["/health".to_string()],
        }
    }
}

/// How the prior-lockout count is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    /// Count every lockout in a history counter.
    #[default]
    History,
    /// 1 if a stale lock timestamp is still present, else 0.
    Presence,
}

/// Per-identity lockout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub base_minutes: u64,
    pub multiplier: u64,
    pub max_minutes: u64,

    /// Lifetime of the failure counter and lock timestamp.
    pub state_ttl_secs: u64,

    /// Lifetime of the prior-lockout history.
    pub history_ttl_secs: u64,

    pub escalation: Escalation,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_minutes: 15,
            multiplier: 2,
            max_minutes: 1440,
            state_ttl_secs: 86_400,
            history_ttl_secs: 30 * 86_400,
            escalation: Escalation::History,
        }
    }
}

/// Per-IP throttle configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub hourly_limit: u64,
    pub daily_limit: u64,
    pub hourly_block_minutes: u64,
    pub daily_block_minutes: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            hourly_limit: 20,
            daily_limit: 100,
            hourly_block_minutes: 60,
            daily_block_minutes: 240,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// Failures (identity or IP hourly) at which a CAPTCHA is demanded.
    pub threshold: u64,

    /// Score attached to a login attempt once a CAPTCHA is demanded.
    pub brute_force_weight: u32,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            brute_force_weight: 20,
        }
    }
}

/// Authentication endpoints observed by the gateway.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths that accept login POSTs. Matched exactly except for ASCII case
    /// and trailing slashes.
    pub login_paths: Vec<String>,

    /// Header naming the identity being authenticated. Only set this when a
    /// trusted proxy in front of the gateway overwrites the header on every
    /// request; clients can send anything. When it names a different
    /// identity than the body, both are charged.
    pub identity_header: Option<String>,

    /// Body fields searched, in order, for the identity.
    pub identity_fields: Vec<String>,

    pub captcha_header: String,

    /// Upstream statuses that count as a failed login.
    pub failure_statuses: Vec<u16>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_paths: vec!["/login".to_string(), "/api/auth/login".to_string()],
            identity_header: None,
            identity_fields: vec!["username".to_string(), "email".to_string()],
            captcha_header: "x-captcha-token".to_string(),
            failure_statuses: vec![401, 403],
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_policy_constants() {
        let config = GateConfig::default();
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.lockout.base_minutes, 15);
        assert_eq!(config.lockout.max_minutes, 1440);
        assert_eq!(config.throttle.hourly_limit, 20);
        assert_eq!(config.throttle.daily_limit, 100);
        assert_eq!(config.captcha.threshold, 3);
        assert_eq!(config.detection.max_suspicious_score, 50);
        assert_eq!(config.detection.max_payload_bytes, 5 * 1024 * 1024);
        assert_eq!(config.csrf.token_ttl_secs, 3600);
        assert_eq!(config.resilience.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GateConfig = toml::from_str(
            r#"
            [resilience]
            failure_policy = "closed"

            [lockout]
            escalation = "presence"
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.resilience.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.resilience.store_timeout_ms, 50);
        assert_eq!(config.lockout.escalation, Escalation::Presence);
        assert_eq!(config.lockout.max_attempts, 3);
        assert_eq!(config.lockout.base_minutes, 15);
        assert!(config.csrf.enabled);
    }
}
