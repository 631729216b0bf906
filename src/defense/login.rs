//! Login endpoint orchestration.
//!
//! The gateway does not know whether credentials are valid; the upstream
//! does. So a login attempt is checked before forwarding (IP block, identity
//! lockout, CAPTCHA) and its outcome is read back from the upstream status.

use std::net::IpAddr;

use axum::http::{Method, StatusCode};

use crate::config::{AuthConfig, FailurePolicy};
use crate::defense::captcha::{CaptchaContext, CaptchaPolicy};
use crate::defense::lockout::LockoutManager;
use crate::defense::throttle::IpThrottle;
use crate::detection::{RequestSnapshot, SecurityThreatContext, ThreatCategory, ThreatFinding};
use crate::gate::degrade::tolerate;
use crate::gate::{BlockCode, Decision};
use crate::observability::metrics;

/// A login POST as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAttempt {
    /// Every identity the request names. The body identity comes first; a
    /// differing trusted-header identity follows and is charged as well.
    pub identities: Vec<String>,
    pub ip: Option<IpAddr>,
    pub captcha_token: Option<String>,
}

/// Applies lockout, throttle and CAPTCHA policy to login attempts.
#[derive(Clone)]
pub struct LoginGuard {
    lockout: LockoutManager,
    throttle: IpThrottle,
    captcha: CaptchaPolicy,
    auth: AuthConfig,
    brute_force_weight: u32,
    failure_policy: FailurePolicy,
}

impl LoginGuard {
    pub fn new(
        lockout: LockoutManager,
        throttle: IpThrottle,
        captcha: CaptchaPolicy,
        auth: AuthConfig,
        brute_force_weight: u32,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            lockout,
            throttle,
            captcha,
            auth,
            brute_force_weight,
            failure_policy,
        }
    }

    fn is_login_path(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.auth
            .login_paths
            .iter()
            .any(|p| normalize_path(p).eq_ignore_ascii_case(path))
    }

    /// Recognize a login attempt. `None` for anything but a POST to a login path.
    pub fn attempt(&self, request: &RequestSnapshot) -> Option<LoginAttempt> {
        if request.method != Method::POST || !self.is_login_path(&request.path) {
            return None;
        }

        let clean = |id: &str| Some(id.trim()).filter(|id| !id.is_empty()).map(str::to_string);
        let mut identities: Vec<String> = request
            .body_field(&self.auth.identity_fields)
            .and_then(clean)
            .into_iter()
            .collect();
        if let Some(header) = self.auth.identity_header.as_deref() {
            if let Some(id) = request.header(header).and_then(clean) {
                if !identities.contains(&id) {
                    identities.push(id);
                }
            }
        }

        Some(LoginAttempt {
            identities,
            ip: request.source_ip,
            captcha_token: request.header(&self.auth.captcha_header).map(str::to_string),
        })
    }

    /// Decide whether the attempt may reach the upstream.
    pub async fn precheck(
        &self,
        attempt: &LoginAttempt,
        context: &mut SecurityThreatContext,
    ) -> Decision {
        if let Some(ip) = attempt.ip {
            match tolerate(self.failure_policy, "throttle_check", self.throttle.check_block(ip).await) {
                Err(code) => return Decision::Block(code),
                Ok(Some(status)) if status.is_blocked => {
                    tracing::info!(ip = %ip, minutes = ?status.minutes_remaining, "Login from blocked IP rejected");
                    return Decision::Block(BlockCode::IpBlocked);
                }
                Ok(_) => {}
            }
        }

        for id in &attempt.identities {
            match tolerate(self.failure_policy, "lockout_check", self.lockout.check(id).await) {
                Err(code) => return Decision::Block(code),
                Ok(Some(status)) if status.is_blocked => {
                    tracing::info!(identity = %id, minutes = ?status.minutes_remaining, "Login for locked identity rejected");
                    return Decision::Block(BlockCode::AccountLocked);
                }
                Ok(_) => {}
            }
        }

        let mut required = false;
        let named: Vec<Option<&str>> = if attempt.identities.is_empty() {
            vec![None]
        } else {
            attempt.identities.iter().map(|id| Some(id.as_str())).collect()
        };
        for identity in named {
            match tolerate(
                self.failure_policy,
                "captcha_check",
                self.captcha.should_require(identity, attempt.ip).await,
            ) {
                Err(code) => return Decision::Block(code),
                Ok(Some(true)) => {
                    required = true;
                    break;
                }
                Ok(_) => {}
            }
        }

        if required {
            context.push(ThreatFinding::new(
                ThreatCategory::BruteForceRate,
                "brute-force-captcha",
                self.brute_force_weight,
                "repeated authentication failures",
            ));

            let solved = match attempt.captcha_token.as_deref() {
                Some(token) => {
                    let captcha_context = CaptchaContext {
                        identity: attempt.identities.first().cloned(),
                        ip: attempt.ip,
                    };
                    self.captcha.verify(token, &captcha_context).await
                }
                None => false,
            };
            if !solved {
                return Decision::Block(BlockCode::CaptchaRequired);
            }
        }

        Decision::Allow
    }

    /// Feed the upstream's answer back into lockout and throttle state.
    pub async fn record_outcome(&self, attempt: &LoginAttempt, status: StatusCode) {
        if self.auth.failure_statuses.contains(&status.as_u16()) {
            for id in &attempt.identities {
                match self.lockout.record_failure(id).await {
                    Ok(outcome) => tracing::debug!(
                        identity = %id,
                        attempts_remaining = outcome.attempts_remaining,
                        locked = outcome.should_block,
                        "Login failure recorded"
                    ),
                    Err(e) => {
                        metrics::record_store_degraded("lockout_record");
                        tracing::warn!(identity = %id, error = %e, "Failed to record login failure");
                    }
                }
            }
            if let Some(ip) = attempt.ip {
                if let Err(e) = self.throttle.record_failure(ip).await {
                    metrics::record_store_degraded("throttle_record");
                    tracing::warn!(ip = %ip, error = %e, "Failed to record IP failure");
                }
            }
        } else if status.is_success() {
            for id in &attempt.identities {
                if let Err(e) = self.lockout.record_success(id).await {
                    metrics::record_store_degraded("lockout_success");
                    tracing::warn!(identity = %id, error = %e, "Failed to record login success");
                }
            }
        }
    }
}

/// `/login/` and `/login` name the same endpoint.
fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
