//! Defense behavior over simulated time, against the in-memory store.

use std::net::IpAddr;
use std::sync::Arc;

use axum::http::Method;
use serde_json::json;

use request_defense::clock::ManualClock;
use request_defense::config::{GateConfig, LockoutConfig, ThrottleConfig};
use request_defense::defense::{IpThrottle, LockoutManager, ThrottleReason};
use request_defense::detection::{RequestSnapshot, ThreatCategory};
use request_defense::gate::{BlockCode, Decision, Gatekeeper, TracingAuditSink};
use request_defense::store::{MemoryStore, SharedStore};

const START: u64 = 1_700_000_000_000;

fn fixture() -> (SharedStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    (Arc::new(MemoryStore::new(clock.clone())), clock)
}

#[tokio::test]
async fn test_sixth_attempt_reports_lockout() {
    let (store, clock) = fixture();
    let lockout = LockoutManager::new(store, clock, LockoutConfig::default());

    for attempt in 1..=5u32 {
        let outcome = lockout.record_failure("u1").await.unwrap();
        assert_eq!(outcome.should_block, attempt == 5);
    }

    let status = lockout.check("u1").await.unwrap();
    assert!(status.is_blocked);
    assert!(status.minutes_remaining.unwrap() > 0);
}

#[tokio::test]
async fn test_twenty_first_check_reports_hourly_limit() {
    let (store, _) = fixture();
    let throttle = IpThrottle::new(store, ThrottleConfig::default());
    let ip: IpAddr = "203.0.113.5".parse().unwrap();

    let mut statuses = Vec::new();
    for _ in 0..21 {
        throttle.record_failure(ip).await.unwrap();
        statuses.push(throttle.check_block(ip).await.unwrap());
    }

    assert!(statuses[..19].iter().all(|s| !s.is_blocked));
    let last = statuses.last().unwrap();
    assert!(last.is_blocked);
    assert_eq!(last.reason, Some(ThrottleReason::HourlyLimit));
    assert_eq!(last.reason.unwrap().as_str(), "hourly limit");
}

#[tokio::test]
async fn test_lockout_durations_escalate_to_the_cap() {
    let (store, clock) = fixture();
    let lockout = LockoutManager::new(store, clock.clone(), LockoutConfig::default());

    let mut durations = Vec::new();
    for _ in 0..9 {
        let mut outcome = None;
        for _ in 0..5 {
            outcome = Some(lockout.record_failure("u1").await.unwrap());
        }
        let minutes = outcome.unwrap().lockout_minutes.unwrap();
        durations.push(minutes);

        // Let the lock lapse; history survives.
        clock.advance_minutes(minutes);
        assert!(!lockout.check("u1").await.unwrap().is_blocked);
    }

    assert_eq!(durations, vec![15, 30, 60, 120, 240, 480, 960, 1440, 1440]);
    assert!(durations.windows(2).all(|w| w[0] <= w[1]));

    // Only an administrator forgets the history.
    lockout.reset("u1").await.unwrap();
    for _ in 0..5 {
        lockout.record_failure("u1").await.unwrap();
    }
    assert_eq!(lockout.state("u1").await.unwrap().prior_lockout_count, 1);
    assert_eq!(lockout.check("u1").await.unwrap().minutes_remaining, Some(15));
}

#[tokio::test]
async fn test_success_keeps_escalation_history() {
    let (store, clock) = fixture();
    let lockout = LockoutManager::new(store, clock.clone(), LockoutConfig::default());

    for _ in 0..5 {
        lockout.record_failure("u1").await.unwrap();
    }
    lockout.record_success("u1").await.unwrap();
    assert!(!lockout.check("u1").await.unwrap().is_blocked);

    let mut last = None;
    for _ in 0..5 {
        last = Some(lockout.record_failure("u1").await.unwrap());
    }
    assert_eq!(last.unwrap().lockout_minutes, Some(30));
}

#[tokio::test]
async fn test_missing_token_is_scored_not_blocked() {
    let (store, clock) = fixture();
    let gate = Gatekeeper::new(&GateConfig::default(), store, clock, Arc::new(TracingAuditSink)).unwrap();

    let request = RequestSnapshot::new(Method::POST, "/account/email")
        .with_header("user-agent", "Mozilla/5.0")
        .with_json_body(json!({"email": "new@example.com"}));
    let verdict = gate.evaluate(&request).await;

    assert_eq!(verdict.decision, Decision::Allow);
    assert_eq!(verdict.context.findings().len(), 1);
    assert_eq!(verdict.context.count(ThreatCategory::CsrfMissing), 1);
}

#[tokio::test]
async fn test_tautology_in_body_is_blocked() {
    let (store, clock) = fixture();
    let gate = Gatekeeper::new(&GateConfig::default(), store, clock, Arc::new(TracingAuditSink)).unwrap();

    let request = RequestSnapshot::new(Method::POST, "/search")
        .with_header("user-agent", "Mozilla/5.0")
        .with_json_body(json!({"q": "' OR '1'='1"}))
        .with_source_ip("198.51.100.9".parse().unwrap());

    assert_eq!(
        gate.evaluate(&request).await.decision,
        Decision::Block(BlockCode::SuspiciousActivityDetected)
    );
}
