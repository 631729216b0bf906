//! CAPTCHA escalation.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::defense::lockout::LockoutManager;
use crate::defense::throttle::IpThrottle;
use crate::store::StoreResult;

/// What the provider is told about the attempt being verified.
#[derive(Debug, Clone, Default)]
pub struct CaptchaContext {
    pub identity: Option<String>,
    pub ip: Option<IpAddr>,
}

/// External CAPTCHA verification service.
#[async_trait]
pub trait CaptchaProvider: Send + Sync + 'static {
    async fn verify(&self, token: &str, context: &CaptchaContext) -> bool;
}

/// Placeholder provider: accepts any token of at least ten characters.
///
/// Not a real verification. Replace with a provider backed by an actual
/// CAPTCHA service before relying on the escalation.
#[derive(Debug)]
pub struct StubCaptchaProvider;

impl StubCaptchaProvider {
    pub const MIN_TOKEN_LEN: usize = 10;

    pub fn new() -> Self {
        tracing::warn!("Using stub CAPTCHA provider: tokens are length-checked only");
        Self
    }
}

impl Default for StubCaptchaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptchaProvider for StubCaptchaProvider {
    async fn verify(&self, token: &str, _context: &CaptchaContext) -> bool {
        token.len() >= Self::MIN_TOKEN_LEN
    }
}

/// Decides when a client must solve a CAPTCHA.
#[derive(Clone)]
pub struct CaptchaPolicy {
    lockout: LockoutManager,
    throttle: IpThrottle,
    provider: Arc<dyn CaptchaProvider>,
    threshold: u64,
}

impl CaptchaPolicy {
    pub fn new(
        lockout: LockoutManager,
        throttle: IpThrottle,
        provider: Arc<dyn CaptchaProvider>,
        threshold: u64,
    ) -> Self {
        Self {
            lockout,
            throttle,
            provider,
            threshold,
        }
    }

    /// True once the identity's failures or the IP's hourly failures reach
    /// the threshold.
    pub async fn should_require(
        &self,
        identity: Option<&str>,
        ip: Option<IpAddr>,
    ) -> StoreResult<bool> {
        if let Some(id) = identity {
            if self.lockout.failed_attempts(id).await? >= self.threshold {
                return Ok(true);
            }
        }
        if let Some(ip) = ip {
            if self.throttle.hourly_failures(ip).await? >= self.threshold {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn verify(&self, token: &str, context: &CaptchaContext) -> bool {
        self.provider.verify(token, context).await
    }
}
