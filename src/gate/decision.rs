//! Gate outcomes and their HTTP rendering.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::detection::SecurityThreatContext;

/// Machine-readable reason a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockCode {
    SuspiciousActivityDetected,
    IpBlocked,
    AccountLocked,
    CaptchaRequired,
    CsrfTokenInvalid,
    ServiceUnavailable,
}

impl BlockCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockCode::SuspiciousActivityDetected => "SUSPICIOUS_ACTIVITY_DETECTED",
            BlockCode::IpBlocked => "IP_BLOCKED",
            BlockCode::AccountLocked => "ACCOUNT_LOCKED",
            BlockCode::CaptchaRequired => "CAPTCHA_REQUIRED",
            BlockCode::CsrfTokenInvalid => "CSRF_TOKEN_INVALID",
            BlockCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Client-facing text. Never names the rule that fired.
    pub fn message(&self) -> &'static str {
        match self {
            BlockCode::SuspiciousActivityDetected => "Request blocked due to suspicious activity",
            BlockCode::IpBlocked => "Too many requests from this address",
            BlockCode::AccountLocked => "Account temporarily locked",
            BlockCode::CaptchaRequired => "CAPTCHA verification required",
            BlockCode::CsrfTokenInvalid => "Invalid or missing anti-forgery token",
            BlockCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BlockCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::FORBIDDEN,
        }
    }
}

impl std::fmt::Display for BlockCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IntoResponse for BlockCode {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.as_str(),
                "message": self.message(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// What the gate decided for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockCode),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Block(_) => "block",
        }
    }
}

/// Decision plus the findings that led to it.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub decision: Decision,
    pub context: SecurityThreatContext,
}

impl Verdict {
    pub fn allow(context: SecurityThreatContext) -> Self {
        Self {
            decision: Decision::Allow,
            context,
        }
    }

    pub fn block(code: BlockCode, context: SecurityThreatContext) -> Self {
        Self {
            decision: Decision::Block(code),
            context,
        }
    }
}
