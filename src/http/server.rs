//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the store, gatekeeper and login guard from configuration
//! - Wire up middleware (request id, tracing, timeout, defense gate)
//! - Serve the anti-forgery token endpoint
//! - Forward everything else to the upstream application
//! - Run store housekeeping and live policy reloads until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::admin::AdminState;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{GateConfig, PolicyUpdate};
use crate::defense::{CaptchaPolicy, IpThrottle, LockoutManager, LoginGuard, StubCaptchaProvider};
use crate::detection::snapshot::cookie_value;
use crate::detection::DetectionError;
use crate::gate::{defense_middleware, BlockCode, GateState, Gatekeeper, TracingAuditSink};
use crate::http::proxy::Upstream;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::store::{MemoryStore, SharedStore, TimedStore};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid upstream: {0}")]
    Upstream(String),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub upstream: Upstream,
}

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    pub session_id: String,
    pub csrf_token: String,
    pub expires_at: u64,
}

/// The defense gateway.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
    memory: MemoryStore,
    gatekeeper: Arc<Gatekeeper>,
    lockout: LockoutManager,
}

impl HttpServer {
    /// Create a new gateway with the given configuration.
    pub fn new(config: GateConfig) -> Result<Self, ServerError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GateConfig, clock: SharedClock) -> Result<Self, ServerError> {
        let memory = MemoryStore::new(clock.clone());
        let store: SharedStore = Arc::new(TimedStore::new(
            memory.clone(),
            Duration::from_millis(config.resilience.store_timeout_ms),
        ));

        let gatekeeper = Arc::new(Gatekeeper::new(
            &config,
            store.clone(),
            clock.clone(),
            Arc::new(TracingAuditSink),
        )?);
        let lockout = LockoutManager::new(store.clone(), clock, config.lockout.clone());
        let throttle = IpThrottle::new(store, config.throttle.clone());
        let captcha = CaptchaPolicy::new(
            lockout.clone(),
            throttle.clone(),
            Arc::new(StubCaptchaProvider::new()),
            config.captcha.threshold,
        );

        let gate_state = GateState {
            gatekeeper: gatekeeper.clone(),
            login: LoginGuard::new(
                lockout.clone(),
                throttle,
                captcha,
                config.auth.clone(),
                config.captcha.brute_force_weight,
                config.resilience.failure_policy,
            ),
            trust_forwarded_for: config.listener.trust_forwarded_for,
        };
        let state = AppState {
            gatekeeper: gatekeeper.clone(),
            upstream: Upstream::new(
                &config.upstream.url,
                Duration::from_secs(config.timeouts.upstream_secs),
            )?,
        };

        let router = Self::build_router(&config, state, gate_state);
        Ok(Self {
            router,
            config,
            memory,
            gatekeeper,
            lockout,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GateConfig, state: AppState, gate_state: GateState) -> Router {
        Router::new()
            .route("/_gate/csrf", get(issue_csrf_token))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(from_fn_with_state(gate_state, defense_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
    }

    /// The gateway router, without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// State for the admin API, sharing this gateway's store.
    pub fn admin_state(&self) -> AdminState {
        AdminState {
            gatekeeper: self.gatekeeper.clone(),
            lockout: self.lockout.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
            failure_policy: self.config.resilience.failure_policy,
            started_at: Instant::now(),
        }
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut policy_updates: mpsc::UnboundedReceiver<PolicyUpdate>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            failure_policy = ?self.config.resilience.failure_policy,
            "Defense gateway starting"
        );

        let memory = self.memory.clone();
        let interval = Duration::from_secs(self.config.store.sweep_interval_secs.max(1));
        let mut sweeper_shutdown = shutdown.resubscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = memory.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, remaining = memory.len(), "Expired keys purged");
                        }
                    }
                    _ = sweeper_shutdown.recv() => break,
                }
            }
        });

        let gatekeeper = self.gatekeeper.clone();
        tokio::spawn(async move {
            while let Some(update) = policy_updates.recv().await {
                if let Err(e) = gatekeeper.reload(&update) {
                    tracing::error!(error = %e, "Rejected config update");
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}

/// Hand out the caller's pending anti-forgery token, minting a session or
/// token as needed.
async fn issue_csrf_token(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let policy = state.gatekeeper.policy();
    let session_id = headers
        .get(policy.csrf.session_header.as_str())
        .and_then(|v| v.to_str().ok())
        .or_else(|| cookie_value(&headers, &policy.csrf.session_cookie))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    match state.gatekeeper.csrf().token_for(&session_id).await {
        Ok(token) => Json(CsrfTokenResponse {
            session_id,
            csrf_token: token.value,
            expires_at: token.expires_at,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to issue CSRF token");
            BlockCode::ServiceUnavailable.into_response()
        }
    }
}

/// Forward an allowed request upstream.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();
    tracing::debug!(
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        "Forwarding request"
    );
    state.upstream.forward(request).await
}
