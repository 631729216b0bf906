//! Per-IP failure throttling over hourly and daily windows.
//!
//! The hourly window catches bursts, the daily window catches slow
//! credential stuffing. Only failures are counted; successes neither add to
//! nor forgive the counters, which simply age out with their window.

use std::net::IpAddr;

use serde::Serialize;

use crate::config::ThrottleConfig;
use crate::observability::metrics;
use crate::store::{parse_u64, SharedStore, StoreResult};

const HOUR_SECS: u64 = 3600;
const DAY_SECS: u64 = 86_400;

/// Why an IP is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleReason {
    HourlyLimit,
    DailyLimit,
    Manual,
}

impl ThrottleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleReason::HourlyLimit => "hourly limit",
            ThrottleReason::DailyLimit => "daily limit",
            ThrottleReason::Manual => "manual",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "hourly limit" => Some(ThrottleReason::HourlyLimit),
            "daily limit" => Some(ThrottleReason::DailyLimit),
            "manual" => Some(ThrottleReason::Manual),
            _ => None,
        }
    }
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answer to "is this IP blocked?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpBlockStatus {
    pub is_blocked: bool,
    pub minutes_remaining: Option<u64>,
    pub reason: Option<ThrottleReason>,
}

impl IpBlockStatus {
    fn allowed() -> Self {
        Self {
            is_blocked: false,
            minutes_remaining: None,
            reason: None,
        }
    }
}

/// Raw throttle state of one IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpThrottleState {
    pub hourly: u64,
    pub daily: u64,
    pub blocked_minutes_remaining: Option<u64>,
    pub block_reason: Option<ThrottleReason>,
}

/// Tracks failed authentications per source IP.
#[derive(Clone)]
pub struct IpThrottle {
    store: SharedStore,
    config: ThrottleConfig,
}

impl IpThrottle {
    pub fn new(store: SharedStore, config: ThrottleConfig) -> Self {
        Self { store, config }
    }

    fn hourly_key(ip: IpAddr) -> String {
        format!("throttle:{ip}:hourly")
    }

    fn daily_key(ip: IpAddr) -> String {
        format!("throttle:{ip}:daily")
    }

    fn block_key(ip: IpAddr) -> String {
        format!("throttle:{ip}:block")
    }

    async fn counter(&self, key: &str) -> StoreResult<u64> {
        Ok(parse_u64(key, self.store.get(key).await?)?.unwrap_or(0))
    }

    pub async fn hourly_failures(&self, ip: IpAddr) -> StoreResult<u64> {
        self.counter(&Self::hourly_key(ip)).await
    }

    /// Count one failed attempt in both windows.
    pub async fn record_failure(&self, ip: IpAddr) -> StoreResult<()> {
        let hourly = self.store.increment(&Self::hourly_key(ip), HOUR_SECS).await?;
        let daily = self.store.increment(&Self::daily_key(ip), DAY_SECS).await?;
        tracing::debug!(ip = %ip, hourly, daily, "IP failure recorded");
        Ok(())
    }

    /// Report the block flag, raising it when a window limit is reached.
    ///
    /// An existing block is reported as-is; further failures never extend it.
    pub async fn check_block(&self, ip: IpAddr) -> StoreResult<IpBlockStatus> {
        let block_key = Self::block_key(ip);
        if let Some(raw) = self.store.get(&block_key).await? {
            let minutes = self
                .store
                .ttl_secs(&block_key)
                .await?
                .map(|secs| secs.div_ceil(60));
            return Ok(IpBlockStatus {
                is_blocked: true,
                minutes_remaining: minutes,
                reason: ThrottleReason::parse(&raw),
            });
        }

        let limits = [
            (
                self.hourly_failures(ip).await?,
                self.config.hourly_limit,
                self.config.hourly_block_minutes,
                ThrottleReason::HourlyLimit,
            ),
            (
                self.counter(&Self::daily_key(ip)).await?,
                self.config.daily_limit,
                self.config.daily_block_minutes,
                ThrottleReason::DailyLimit,
            ),
        ];

        for (count, limit, minutes, reason) in limits {
            if count >= limit {
                self.block(ip, minutes, reason).await?;
                tracing::warn!(ip = %ip, failures = count, reason = %reason, "IP blocked");
                return Ok(IpBlockStatus {
                    is_blocked: true,
                    minutes_remaining: Some(minutes),
                    reason: Some(reason),
                });
            }
        }

        Ok(IpBlockStatus::allowed())
    }

    /// Raise the block flag for `minutes`.
    pub async fn block(&self, ip: IpAddr, minutes: u64, reason: ThrottleReason) -> StoreResult<()> {
        self.store
            .set_with_ttl(&Self::block_key(ip), reason.as_str(), minutes * 60)
            .await?;
        metrics::record_ip_block(reason.as_str());
        Ok(())
    }

    /// Administrative unblock: drops the flag and both windows.
    pub async fn unblock(&self, ip: IpAddr) -> StoreResult<()> {
        self.store.delete(&Self::block_key(ip)).await?;
        self.store.delete(&Self::hourly_key(ip)).await?;
        self.store.delete(&Self::daily_key(ip)).await?;
        tracing::info!(ip = %ip, "IP unblocked by administrator");
        Ok(())
    }

    pub async fn state(&self, ip: IpAddr) -> StoreResult<IpThrottleState> {
        let block_key = Self::block_key(ip);
        let reason = self.store.get(&block_key).await?;
        let blocked_minutes_remaining = match reason {
            Some(_) => self
                .store
                .ttl_secs(&block_key)
                .await?
                .map(|secs| secs.div_ceil(60)),
            None => None,
        };

        Ok(IpThrottleState {
            hourly: self.hourly_failures(ip).await?,
            daily: self.counter(&Self::daily_key(ip)).await?,
            blocked_minutes_remaining,
            block_reason: reason.as_deref().and_then(ThrottleReason::parse),
        })
    }
}
