//! Per-identity progressive lockout.
//!
//! # States
//! ```text
//! UNLOCKED → LOCKED: failed_attempts reaches max_attempts
//! LOCKED → UNLOCKED: locked_until passes (observed by `check`) or a success
//! ```
//!
//! Lock duration doubles with every prior lockout of the same identity, up to
//! the configured cap. Successful logins clear the attempt counter but keep
//! the lockout history.

use serde::Serialize;

use crate::clock::{minutes_until, SharedClock};
use crate::config::{Escalation, LockoutConfig};
use crate::observability::metrics;
use crate::store::{parse_u64, SharedStore, StoreResult};

/// Answer to "may this identity try to authenticate?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutStatus {
    pub is_blocked: bool,
    pub attempts_remaining: u32,
    pub minutes_remaining: Option<u64>,
}

/// Result of recording one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureOutcome {
    pub should_block: bool,
    pub attempts_remaining: u32,
    pub locked_until: Option<u64>,
    pub lockout_minutes: Option<u64>,
}

/// Raw lockout state of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockoutState {
    pub failed_attempts: u64,
    pub last_failed_at: Option<u64>,
    pub locked_until: Option<u64>,
    pub prior_lockout_count: u64,
}

/// Tracks failed authentications per identity.
#[derive(Clone)]
pub struct LockoutManager {
    store: SharedStore,
    clock: SharedClock,
    config: LockoutConfig,
}

impl LockoutManager {
    pub fn new(store: SharedStore, clock: SharedClock, config: LockoutConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    fn attempts_key(id: &str) -> String {
        format!("lockout:{id}:attempts")
    }

    fn last_failed_key(id: &str) -> String {
        format!("lockout:{id}:last_failed")
    }

    fn locked_until_key(id: &str) -> String {
        format!("lockout:{id}:locked_until")
    }

    fn history_key(id: &str) -> String {
        format!("lockout:{id}:history")
    }

    /// Lock duration for an identity with `prior` earlier lockouts.
    pub fn lockout_minutes(&self, prior: u64) -> u64 {
        let factor = u32::try_from(prior)
            .ok()
            .and_then(|p| self.config.multiplier.checked_pow(p))
            .unwrap_or(u64::MAX);
        self.config
            .base_minutes
            .saturating_mul(factor)
            .min(self.config.max_minutes)
    }

    fn remaining(&self, attempts: u64) -> u32 {
        u64::from(self.config.max_attempts).saturating_sub(attempts) as u32
    }

    pub async fn failed_attempts(&self, id: &str) -> StoreResult<u64> {
        let key = Self::attempts_key(id);
        Ok(parse_u64(&key, self.store.get(&key).await?)?.unwrap_or(0))
    }

    /// Report whether the identity is locked, lifting expired locks.
    pub async fn check(&self, id: &str) -> StoreResult<LockoutStatus> {
        let now = self.clock.now_millis();
        let locked_key = Self::locked_until_key(id);

        if let Some(until) = parse_u64(&locked_key, self.store.get(&locked_key).await?)? {
            if until > now {
                return Ok(LockoutStatus {
                    is_blocked: true,
                    attempts_remaining: 0,
                    minutes_remaining: Some(minutes_until(now, until)),
                });
            }

            self.store.delete(&Self::attempts_key(id)).await?;
            self.store.delete(&locked_key).await?;
            tracing::info!(identity = %id, "Lockout expired");
            return Ok(LockoutStatus {
                is_blocked: false,
                attempts_remaining: self.config.max_attempts,
                minutes_remaining: None,
            });
        }

        let attempts = self.failed_attempts(id).await?;
        Ok(LockoutStatus {
            is_blocked: false,
            attempts_remaining: self.remaining(attempts),
            minutes_remaining: None,
        })
    }

    /// Count a failed authentication, locking the identity at the threshold.
    pub async fn record_failure(&self, id: &str) -> StoreResult<FailureOutcome> {
        let now = self.clock.now_millis();
        let ttl = self.config.state_ttl_secs;

        let attempts = self
            .store
            .increment(&Self::attempts_key(id), ttl)
            .await?
            .max(0) as u64;
        self.store
            .set_with_ttl(&Self::last_failed_key(id), &now.to_string(), ttl)
            .await?;

        if attempts < u64::from(self.config.max_attempts) {
            tracing::debug!(identity = %id, attempts, "Authentication failure recorded");
            return Ok(FailureOutcome {
                should_block: false,
                attempts_remaining: self.remaining(attempts),
                locked_until: None,
                lockout_minutes: None,
            });
        }

        let locked_key = Self::locked_until_key(id);
        let prior = match self.config.escalation {
            Escalation::History => {
                let count = self
                    .store
                    .increment(&Self::history_key(id), self.config.history_ttl_secs)
                    .await?;
                (count.max(1) - 1) as u64
            }
            Escalation::Presence => u64::from(self.store.exists(&locked_key).await?),
        };

        let minutes = self.lockout_minutes(prior);
        let locked_until = now + minutes * 60_000;
        self.store
            .set_with_ttl(&locked_key, &locked_until.to_string(), ttl.max(minutes * 60))
            .await?;

        metrics::record_lockout();
        tracing::warn!(
            identity = %id,
            attempts,
            prior_lockouts = prior,
            lockout_minutes = minutes,
            "Identity locked out"
        );

        Ok(FailureOutcome {
            should_block: true,
            attempts_remaining: 0,
            locked_until: Some(locked_until),
            lockout_minutes: Some(minutes),
        })
    }

    /// Clear the failure counter and any active lock. History is kept.
    pub async fn record_success(&self, id: &str) -> StoreResult<()> {
        self.store.delete(&Self::attempts_key(id)).await?;
        self.store.delete(&Self::last_failed_key(id)).await?;
        self.store.delete(&Self::locked_until_key(id)).await?;
        Ok(())
    }

    /// Administrative reset: forget everything, including lockout history.
    pub async fn reset(&self, id: &str) -> StoreResult<()> {
        self.record_success(id).await?;
        self.store.delete(&Self::history_key(id)).await?;
        tracing::info!(identity = %id, "Lockout state reset by administrator");
        Ok(())
    }

    pub async fn state(&self, id: &str) -> StoreResult<LockoutState> {
        let last_key = Self::last_failed_key(id);
        let locked_key = Self::locked_until_key(id);
        let history_key = Self::history_key(id);

        Ok(LockoutState {
            failed_attempts: self.failed_attempts(id).await?,
            last_failed_at: parse_u64(&last_key, self.store.get(&last_key).await?)?,
            locked_until: parse_u64(&locked_key, self.store.get(&locked_key).await?)?,
            prior_lockout_count: parse_u64(&history_key, self.store.get(&history_key).await?)?
                .unwrap_or(0),
        })
    }
}
