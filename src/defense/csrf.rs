//! Single-use, session-bound anti-forgery tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use constant_time_eq::constant_time_eq;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::observability::metrics;
use crate::store::{SharedStore, StoreError, StoreResult};

/// Random bytes per token (256 bits).
const TOKEN_BYTES: usize = 32;

/// A token as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    pub session_id: String,
    pub value: String,
    pub issued_at: u64,
    pub expires_at: u64,
    pub used: bool,
}

impl CsrfToken {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// Issues and redeems anti-forgery tokens.
#[derive(Clone)]
pub struct CsrfProtocol {
    store: SharedStore,
    clock: SharedClock,
    ttl_secs: u64,
}

impl CsrfProtocol {
    pub fn new(store: SharedStore, clock: SharedClock, ttl_secs: u64) -> Self {
        Self {
            store,
            clock,
            ttl_secs,
        }
    }

    fn token_key(session_id: &str) -> String {
        format!("csrf:{session_id}")
    }

    fn claim_key(session_id: &str, value: &str) -> String {
        format!("csrf:{session_id}:claim:{value}")
    }

    /// Issue a fresh token for a session, replacing any previous one.
    pub async fn issue(&self, session_id: &str) -> StoreResult<CsrfToken> {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);

        let issued_at = self.clock.now_millis();
        let token = CsrfToken {
            session_id: session_id.to_string(),
            value: URL_SAFE_NO_PAD.encode(bytes),
            issued_at,
            expires_at: issued_at + self.ttl_secs * 1000,
            used: false,
        };

        self.store
            .set_with_ttl(&Self::token_key(session_id), &encode(&token)?, self.ttl_secs)
            .await?;

        tracing::debug!(session_id = %session_id, "CSRF token issued");
        Ok(token)
    }

    /// The session's current token if it can still be redeemed, otherwise a
    /// fresh one. Asking twice never invalidates a pending token.
    pub async fn token_for(&self, session_id: &str) -> StoreResult<CsrfToken> {
        if let Some(raw) = self.store.get(&Self::token_key(session_id)).await? {
            // An unreadable record is replaced below.
            if let Ok(token) = serde_json::from_str::<CsrfToken>(&raw) {
                let claimed = self
                    .store
                    .exists(&Self::claim_key(session_id, &token.value))
                    .await?;
                if !token.used && !claimed && !token.is_expired(self.clock.now_millis()) {
                    return Ok(token);
                }
            }
        }
        self.issue(session_id).await
    }

    /// Redeem a token. Returns true at most once per issued token.
    pub async fn validate(&self, session_id: &str, presented: &str) -> StoreResult<bool> {
        let key = Self::token_key(session_id);
        let Some(raw) = self.store.get(&key).await? else {
            metrics::record_csrf_validation("unknown");
            return Ok(false);
        };
        let token: CsrfToken =
            serde_json::from_str(&raw).map_err(|_| StoreError::Corrupt { key: key.clone() })?;

        if !constant_time_eq(token.value.as_bytes(), presented.as_bytes()) {
            metrics::record_csrf_validation("mismatch");
            return Ok(false);
        }
        let now = self.clock.now_millis();
        if token.is_expired(now) {
            metrics::record_csrf_validation("expired");
            return Ok(false);
        }
        if token.used {
            metrics::record_csrf_validation("replayed");
            return Ok(false);
        }

        // The claim counter is the atomic check-and-mark: only the first
        // caller observes 1, every concurrent or later caller sees more.
        let claim = self
            .store
            .increment(&Self::claim_key(session_id, &token.value), self.ttl_secs)
            .await?;
        if claim != 1 {
            metrics::record_csrf_validation("replayed");
            return Ok(false);
        }

        let remaining = token.expires_at.saturating_sub(now).div_ceil(1000).max(1);
        let used = CsrfToken {
            used: true,
            ..token
        };
        if let Err(e) = self.store.set_with_ttl(&key, &encode(&used)?, remaining).await {
            // The claim already guarantees single use.
            tracing::warn!(session_id = %session_id, error = %e, "Failed to persist used CSRF token");
        }

        metrics::record_csrf_validation("ok");
        Ok(true)
    }
}

fn encode(token: &CsrfToken) -> StoreResult<String> {
    serde_json::to_string(token).map_err(|_| StoreError::Corrupt {
        key: format!("csrf:{}", token.session_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn protocol() -> (CsrfProtocol, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        (CsrfProtocol::new(store, clock.clone(), 3600), clock)
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let (csrf, _) = protocol();
        let token = csrf.issue("s1").await.unwrap();
        assert_eq!(token.expires_at - token.issued_at, 3_600_000);

        assert!(csrf.validate("s1", &token.value).await.unwrap());
        assert!(!csrf.validate("s1", &token.value).await.unwrap());
        assert!(!csrf.validate("s1", &token.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_has_enough_entropy() {
        let (csrf, _) = protocol();
        let a = csrf.issue("s1").await.unwrap();
        let b = csrf.issue("s2").await.unwrap();
        // 32 bytes → 43 base64url characters.
        assert_eq!(a.value.len(), 43);
        assert_ne!(a.value, b.value);
    }

    #[tokio::test]
    async fn test_wrong_session_or_value_fails() {
        let (csrf, _) = protocol();
        let token = csrf.issue("s1").await.unwrap();
        assert!(!csrf.validate("s2", &token.value).await.unwrap());
        assert!(!csrf.validate("s1", "forged").await.unwrap());
        // A failed guess does not burn the real token.
        assert!(csrf.validate("s1", &token.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_token_fails() {
        let (csrf, clock) = protocol();
        let token = csrf.issue("s1").await.unwrap();
        clock.advance_secs(3601);
        assert!(!csrf.validate("s1", &token.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_token() {
        let (csrf, _) = protocol();
        let old = csrf.issue("s1").await.unwrap();
        let new = csrf.issue("s1").await.unwrap();
        assert!(!csrf.validate("s1", &old.value).await.unwrap());
        assert!(csrf.validate("s1", &new.value).await.unwrap());
    }

    #[tokio::test]
    async fn test_token_for_reuses_pending_token() {
        let (csrf, clock) = protocol();
        let first = csrf.token_for("s1").await.unwrap();
        let again = csrf.token_for("s1").await.unwrap();
        assert_eq!(first, again);
        assert!(csrf.validate("s1", &first.value).await.unwrap());

        // Redeemed: the next request gets a new one.
        let next = csrf.token_for("s1").await.unwrap();
        assert_ne!(next.value, first.value);

        clock.advance_secs(3601);
        let renewed = csrf.token_for("s1").await.unwrap();
        assert_ne!(renewed.value, next.value);
        assert!(csrf.validate("s1", &renewed.value).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replay_has_one_winner() {
        let (csrf, _) = protocol();
        let token = csrf.issue("s1").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let csrf = csrf.clone();
            let value = token.value.clone();
            handles.push(tokio::spawn(async move {
                csrf.validate("s1", &value).await.unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
