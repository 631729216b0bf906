//! Operator API for inspecting and clearing defense state.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::config::FailurePolicy;
use crate::defense::LockoutManager;
use crate::gate::Gatekeeper;

#[derive(Clone)]
pub struct AdminState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub lockout: LockoutManager,
    pub api_key: Arc<str>,
    pub failure_policy: FailurePolicy,
    pub started_at: Instant,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/lockouts/{identity}",
            get(get_lockout).delete(reset_lockout),
        )
        .route("/admin/ips/{ip}", get(get_ip).delete(unblock_ip))
        .route("/admin/ips/{ip}/block", post(block_ip))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::GateConfig;
    use crate::gate::TracingAuditSink;
    use crate::store::{MemoryStore, SharedStore};
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn router() -> (Router, AdminState) {
        let config = GateConfig::default();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store: SharedStore = Arc::new(MemoryStore::new(clock.clone()));
        let gatekeeper =
            Gatekeeper::new(&config, store.clone(), clock.clone(), Arc::new(TracingAuditSink))
                .unwrap();
        let state = AdminState {
            gatekeeper: Arc::new(gatekeeper),
            lockout: LockoutManager::new(store, clock, config.lockout.clone()),
            api_key: Arc::from("test-key"),
            failure_policy: FailurePolicy::Open,
            started_at: Instant::now(),
        };
        (setup_admin_router(state.clone()), state)
    }

    fn call(method: &str, uri: &str, key: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("authorization", format!("Bearer {key}"))
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_wrong_key_is_unauthorized() {
        let (app, _) = router();
        let response = app
            .clone()
            .oneshot(call("GET", "/admin/status", "nope", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Near misses of the real key.
        for key in ["test-ke", "test-key-", "Test-key", ""] {
            let response = app
                .clone()
                .oneshot(call("GET", "/admin/status", key, Body::empty()))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "key {key:?}");
        }

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/admin/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status() {
        let (app, _) = router();
        let response = app
            .oneshot(call("GET", "/admin/status", "test-key", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["failure_policy"], "open");
        assert_eq!(body["requests"]["evaluated"], 0);
    }

    #[tokio::test]
    async fn test_lockout_inspect_and_reset() {
        let (app, state) = router();
        for _ in 0..5 {
            state.lockout.record_failure("alice").await.unwrap();
        }

        let response = app
            .clone()
            .oneshot(call("GET", "/admin/lockouts/alice", "test-key", Body::empty()))
            .await
            .unwrap();
        let body = json(response).await;
        assert_eq!(body["status"]["is_blocked"], true);
        assert_eq!(body["state"]["failed_attempts"], 5);
        assert_eq!(body["state"]["prior_lockout_count"], 1);

        let response = app
            .oneshot(call("DELETE", "/admin/lockouts/alice", "test-key", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.lockout.check("alice").await.unwrap().is_blocked);
    }

    #[tokio::test]
    async fn test_manual_ip_block_and_unblock() {
        let (app, state) = router();
        let response = app
            .clone()
            .oneshot(call(
                "POST",
                "/admin/ips/192.0.2.44/block",
                "test-key",
                Body::from(r#"{"minutes": 30}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["throttle"]["block_reason"], "manual");
        assert_eq!(body["throttle"]["blocked_minutes_remaining"], 30);

        let ip = "192.0.2.44".parse().unwrap();
        assert!(state.gatekeeper.throttle().check_block(ip).await.unwrap().is_blocked);

        let response = app
            .clone()
            .oneshot(call("DELETE", "/admin/ips/192.0.2.44", "test-key", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!state.gatekeeper.throttle().check_block(ip).await.unwrap().is_blocked);

        let response = app
            .oneshot(call("GET", "/admin/ips/not-an-ip", "test-key", Body::empty()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
