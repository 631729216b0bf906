//! Per-request defense decision.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::{CsrfConfig, DetectionConfig, FailurePolicy, GateConfig, PolicyUpdate};
use crate::defense::{CsrfProtocol, IpThrottle};
use crate::detection::{
    DetectionError, RequestSnapshot, SecurityThreatContext, ThreatCategory, ThreatFinding,
    ThreatScorer,
};
use crate::gate::audit::{AuditRecord, AuditSink};
use crate::gate::decision::{BlockCode, Decision, Verdict};
use crate::gate::degrade::tolerate;
use crate::observability::metrics;
use crate::store::{SharedStore, StoreResult};

/// Hot-swappable half of the configuration.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub scorer: ThreatScorer,
    pub detection: DetectionConfig,
    pub csrf: CsrfConfig,
}

impl GatePolicy {
    pub fn from_config(config: &GateConfig) -> Result<Self, DetectionError> {
        Self::from_update(&PolicyUpdate::from_config(config))
    }

    pub fn from_update(update: &PolicyUpdate) -> Result<Self, DetectionError> {
        Ok(Self {
            scorer: ThreatScorer::new(&update.detection)?,
            detection: update.detection.clone(),
            csrf: update.csrf.clone(),
        })
    }

    fn csrf_exempt(&self, path: &str) -> bool {
        self.csrf.exempt_paths.iter().any(|p| path.starts_with(p.as_str()))
    }

    fn score_blocking_enabled(&self) -> bool {
        let d = &self.detection;
        d.suspicious_activity && (d.sql_injection || d.xss) && d.block_suspicious
    }
}

/// Running totals since startup.
#[derive(Debug, Default)]
pub struct GateStats {
    evaluated: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GateStatsSnapshot {
    pub evaluated: u64,
    pub allowed: u64,
    pub blocked: u64,
}

impl GateStats {
    pub fn snapshot(&self) -> GateStatsSnapshot {
        GateStatsSnapshot {
            evaluated: self.evaluated.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
        }
    }
}

/// Runs every request through the defense pipeline.
pub struct Gatekeeper {
    store: SharedStore,
    policy: ArcSwap<GatePolicy>,
    csrf: CsrfProtocol,
    throttle: IpThrottle,
    audit: Arc<dyn AuditSink>,
    failure_policy: FailurePolicy,
    stats: GateStats,
}

impl Gatekeeper {
    pub fn new(
        config: &GateConfig,
        store: SharedStore,
        clock: SharedClock,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, DetectionError> {
        Ok(Self {
            policy: ArcSwap::from_pointee(GatePolicy::from_config(config)?),
            csrf: CsrfProtocol::new(store.clone(), clock, config.csrf.token_ttl_secs),
            throttle: IpThrottle::new(store.clone(), config.throttle.clone()),
            store,
            audit,
            failure_policy: config.resilience.failure_policy,
            stats: GateStats::default(),
        })
    }

    fn suspicious_key(ip: IpAddr) -> String {
        format!("suspicious:{ip}")
    }

    pub fn csrf(&self) -> &CsrfProtocol {
        &self.csrf
    }

    pub fn throttle(&self) -> &IpThrottle {
        &self.throttle
    }

    pub fn stats(&self) -> GateStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn policy(&self) -> Arc<GatePolicy> {
        self.policy.load_full()
    }

    /// Swap in new detection and CSRF settings.
    ///
    /// The token lifetime stays the one the protocol was built with.
    pub fn reload(&self, update: &PolicyUpdate) -> Result<(), DetectionError> {
        self.policy.store(Arc::new(GatePolicy::from_update(update)?));
        tracing::info!("Gate policy reloaded");
        Ok(())
    }

    pub async fn is_suspicious(&self, ip: IpAddr) -> StoreResult<bool> {
        self.store.exists(&Self::suspicious_key(ip)).await
    }

    pub async fn clear_suspicious(&self, ip: IpAddr) -> StoreResult<()> {
        self.store.delete(&Self::suspicious_key(ip)).await
    }

    /// Decide one request.
    pub async fn evaluate(&self, request: &RequestSnapshot) -> Verdict {
        let policy = self.policy.load();
        let mut context = SecurityThreatContext::new();

        if let Some(ip) = request.source_ip {
            match tolerate(self.failure_policy, "suspicious_check", self.is_suspicious(ip).await) {
                Err(code) => return Verdict::block(code, context),
                Ok(Some(true)) => return Verdict::block(BlockCode::IpBlocked, context),
                Ok(_) => {}
            }
            match tolerate(self.failure_policy, "throttle_check", self.throttle.check_block(ip).await) {
                Err(code) => return Verdict::block(code, context),
                Ok(Some(status)) if status.is_blocked => {
                    return Verdict::block(BlockCode::IpBlocked, context)
                }
                Ok(_) => {}
            }
        }

        context.absorb(policy.scorer.score(request));

        if let Err(code) = self.check_csrf(&policy, request, &mut context).await {
            return Verdict::block(code, context);
        }

        if policy.score_blocking_enabled()
            && context.total_score() >= policy.detection.max_suspicious_score
        {
            if let Some(ip) = request.source_ip {
                let flagged = self
                    .store
                    .set_with_ttl(
                        &Self::suspicious_key(ip),
                        "1",
                        policy.detection.suspicious_ip_ttl_secs,
                    )
                    .await;
                // The block stands either way.
                if let Err(e) = flagged {
                    metrics::record_store_degraded("suspicious_flag");
                    tracing::warn!(ip = %ip, error = %e, "Failed to flag suspicious IP");
                }
            }
            tracing::warn!(
                ip = ?request.source_ip,
                path = %request.path,
                score = context.total_score(),
                "Suspicious request blocked"
            );
            return Verdict::block(BlockCode::SuspiciousActivityDetected, context);
        }

        Verdict::allow(context)
    }

    async fn check_csrf(
        &self,
        policy: &GatePolicy,
        request: &RequestSnapshot,
        context: &mut SecurityThreatContext,
    ) -> Result<(), BlockCode> {
        let csrf = &policy.csrf;
        if !csrf.enabled || !request.is_mutating() || policy.csrf_exempt(&request.path) {
            return Ok(());
        }

        let session = request
            .header(&csrf.session_header)
            .or_else(|| request.cookie(&csrf.session_cookie));
        let presented = request.header(&csrf.header_name);

        let (rule_id, detail) = match (session, presented) {
            (Some(session), Some(token)) => {
                match tolerate(
                    self.failure_policy,
                    "csrf_validate",
                    self.csrf.validate(session, token).await,
                )? {
                    Some(false) => ("csrf-invalid", "anti-forgery token rejected"),
                    _ => return Ok(()),
                }
            }
            (None, _) => ("csrf-missing", "no session identifier"),
            (_, None) => ("csrf-missing", "no anti-forgery token"),
        };

        if csrf.block_on_failure {
            return Err(BlockCode::CsrfTokenInvalid);
        }
        context.push(ThreatFinding::new(
            ThreatCategory::CsrfMissing,
            rule_id,
            csrf.missing_weight,
            detail,
        ));
        Ok(())
    }

    /// Count and audit the final verdict of a request.
    pub fn conclude(&self, request_id: &str, request: &RequestSnapshot, verdict: &Verdict) {
        self.stats.evaluated.fetch_add(1, Ordering::Relaxed);
        metrics::record_decision(verdict.decision.label());
        for finding in verdict.context.findings() {
            metrics::record_finding(finding.category.as_str());
        }

        let block_code = match verdict.decision {
            Decision::Allow => {
                self.stats.allowed.fetch_add(1, Ordering::Relaxed);
                None
            }
            Decision::Block(code) => {
                self.stats.blocked.fetch_add(1, Ordering::Relaxed);
                metrics::record_block(code.as_str());
                Some(code.as_str())
            }
        };

        self.audit.record(&AuditRecord {
            request_id: request_id.to_string(),
            method: request.method.to_string(),
            path: request.path.clone(),
            ip: request.source_ip,
            findings: verdict.context.findings().to_vec(),
            total_score: verdict.context.total_score(),
            decision: verdict.decision.label(),
            block_code,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gate::audit::TracingAuditSink;
    use crate::store::MemoryStore;
    use axum::http::Method;
    use serde_json::json;

    fn gatekeeper(config: GateConfig) -> (Gatekeeper, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let gate = Gatekeeper::new(&config, store, clock.clone(), Arc::new(TracingAuditSink)).unwrap();
        (gate, clock)
    }

    fn ip() -> IpAddr {
        "203.0.113.9".parse().unwrap()
    }

    #[tokio::test]
    async fn test_clean_get_is_allowed() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let request = RequestSnapshot::new(Method::GET, "/products?page=2")
            .with_header("user-agent", "Mozilla/5.0")
            .with_source_ip(ip());
        let verdict = gate.evaluate(&request).await;
        assert_eq!(verdict.decision, Decision::Allow);
        assert!(verdict.context.is_empty());
    }

    #[tokio::test]
    async fn test_sqli_blocks_and_flags_ip() {
        let (gate, clock) = gatekeeper(GateConfig::default());
        let request = RequestSnapshot::new(Method::GET, "/search?q=%27%20OR%201%3D1%20--")
            .with_header("user-agent", "Mozilla/5.0")
            .with_source_ip(ip());

        let verdict = gate.evaluate(&request).await;
        assert_eq!(
            verdict.decision,
            Decision::Block(BlockCode::SuspiciousActivityDetected)
        );
        assert!(verdict.context.total_score() >= 50);
        assert!(gate.is_suspicious(ip()).await.unwrap());

        // Any follow-up request from the IP is refused without scoring.
        let clean = RequestSnapshot::new(Method::GET, "/").with_source_ip(ip());
        let verdict = gate.evaluate(&clean).await;
        assert_eq!(verdict.decision, Decision::Block(BlockCode::IpBlocked));
        assert!(verdict.context.is_empty());

        clock.advance_secs(3600);
        assert_eq!(gate.evaluate(&clean).await.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_low_score_allows_without_flagging_ip() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let scripted = RequestSnapshot::new(Method::GET, "/products")
            .with_header("user-agent", "curl/8.4.0")
            .with_source_ip(ip());

        let verdict = gate.evaluate(&scripted).await;
        assert_eq!(verdict.decision, Decision::Allow);
        let total = verdict.context.total_score();
        assert!(total > 0 && total < 50, "total {total}");
        assert!(!gate.is_suspicious(ip()).await.unwrap());

        let clean = RequestSnapshot::new(Method::GET, "/")
            .with_header("user-agent", "Mozilla/5.0")
            .with_source_ip(ip());
        assert_eq!(gate.evaluate(&clean).await.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_missing_csrf_adds_weight() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let request = RequestSnapshot::new(Method::POST, "/profile")
            .with_header("user-agent", "Mozilla/5.0")
            .with_json_body(json!({"bio": "hello"}));

        let verdict = gate.evaluate(&request).await;
        assert_eq!(verdict.decision, Decision::Allow);
        assert_eq!(verdict.context.count(ThreatCategory::CsrfMissing), 1);
        assert_eq!(verdict.context.total_score(), 25);
    }

    #[tokio::test]
    async fn test_valid_csrf_token_is_single_use() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let token = gate.csrf().issue("sess-1").await.unwrap();
        let request = RequestSnapshot::new(Method::POST, "/profile")
            .with_header("user-agent", "Mozilla/5.0")
            .with_header("x-session-id", "sess-1")
            .with_header("x-csrf-token", &token.value);

        let first = gate.evaluate(&request).await;
        assert!(first.context.is_empty());
        let replay = gate.evaluate(&request).await;
        assert_eq!(replay.context.count(ThreatCategory::CsrfMissing), 1);
    }

    #[tokio::test]
    async fn test_csrf_with_attack_crosses_threshold() {
        let (gate, _) = gatekeeper(GateConfig::default());
        // 30 (traversal) + 25 (no token) reaches the default threshold.
        let request = RequestSnapshot::new(Method::POST, "/files")
            .with_header("user-agent", "Mozilla/5.0")
            .with_json_body(json!({"path": "../../etc/passwd"}));
        let verdict = gate.evaluate(&request).await;
        assert_eq!(
            verdict.decision,
            Decision::Block(BlockCode::SuspiciousActivityDetected)
        );
    }

    #[tokio::test]
    async fn test_csrf_block_on_failure_and_exemptions() {
        let mut config = GateConfig::default();
        config.csrf.block_on_failure = true;
        let (gate, _) = gatekeeper(config);

        let request = RequestSnapshot::new(Method::DELETE, "/items/4")
            .with_header("user-agent", "Mozilla/5.0");
        assert_eq!(
            gate.evaluate(&request).await.decision,
            Decision::Block(BlockCode::CsrfTokenInvalid)
        );

        let exempt = RequestSnapshot::new(Method::POST, "/health/ping")
            .with_header("user-agent", "Mozilla/5.0");
        assert_eq!(gate.evaluate(&exempt).await.decision, Decision::Allow);
    }

    #[tokio::test]
    async fn test_blocking_disabled_only_scores() {
        let mut config = GateConfig::default();
        config.detection.block_suspicious = false;
        let (gate, _) = gatekeeper(config);

        let request = RequestSnapshot::new(Method::GET, "/?q=%3Cscript%3Ealert(1)%3C%2Fscript%3E")
            .with_source_ip(ip());
        let verdict = gate.evaluate(&request).await;
        assert_eq!(verdict.decision, Decision::Allow);
        assert!(verdict.context.count(ThreatCategory::Xss) >= 1);
    }

    #[tokio::test]
    async fn test_reload_changes_threshold() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let request = RequestSnapshot::new(Method::GET, "/")
            .with_header("user-agent", "curl/8.0");
        assert_eq!(gate.evaluate(&request).await.decision, Decision::Allow);

        let mut strict = GateConfig::default();
        strict.detection.max_suspicious_score = 5;
        gate.reload(&PolicyUpdate::from_config(&strict)).unwrap();
        assert_eq!(
            gate.evaluate(&request).await.decision,
            Decision::Block(BlockCode::SuspiciousActivityDetected)
        );
    }

    #[tokio::test]
    async fn test_conclude_updates_stats() {
        let (gate, _) = gatekeeper(GateConfig::default());
        let request = RequestSnapshot::new(Method::GET, "/");
        gate.conclude("r1", &request, &Verdict::allow(SecurityThreatContext::new()));
        gate.conclude(
            "r2",
            &request,
            &Verdict::block(BlockCode::IpBlocked, SecurityThreatContext::new()),
        );
        let stats = gate.stats();
        assert_eq!((stats.evaluated, stats.allowed, stats.blocked), (2, 1, 1));
    }
}
