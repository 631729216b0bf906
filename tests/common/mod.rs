//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use request_defense::admin::setup_admin_router;
use request_defense::{GateConfig, HttpServer, Shutdown};

pub const PASSWORD: &str = "correct horse";
pub const CAPTCHA: &str = "captcha-solution-token";

/// A running gateway in front of the mock application.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub client: reqwest::Client,
    _shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn admin_url(&self, path: &str) -> String {
        format!("http://{}{}", self.admin_addr, path)
    }
}

/// Start the application the gateway protects.
///
/// `POST /login` answers 200 for [`PASSWORD`] and 401 otherwise; every
/// other route echoes the request id it received.
pub async fn start_mock_upstream() -> SocketAddr {
    let app = Router::new()
        .route(
            "/login",
            post(|Json(body): Json<Value>| async move {
                if body["password"] == PASSWORD {
                    (StatusCode::OK, "welcome")
                } else {
                    (StatusCode::UNAUTHORIZED, "bad credentials")
                }
            }),
        )
        .fallback(|headers: HeaderMap| async move {
            headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .map(|id| format!("upstream saw {id}"))
                .unwrap_or_else(|| "upstream saw no id".to_string())
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Start a gateway (and its admin API) on ephemeral ports.
///
/// `configure` runs after the upstream and admin settings are filled in.
pub async fn start_gateway(configure: impl FnOnce(&mut GateConfig)) -> TestGateway {
    let upstream = start_mock_upstream().await;

    let mut config = GateConfig::default();
    config.upstream.url = format!("http://{upstream}");
    config.listener.trust_forwarded_for = true;
    config.admin.api_key = "test-admin-key".to_string();
    configure(&mut config);

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();

    let admin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let admin_addr = admin_listener.local_addr().unwrap();
    let admin_app = setup_admin_router(server.admin_state());
    tokio::spawn(async move {
        let _ = axum::serve(admin_listener, admin_app).await;
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_, policy_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, policy_updates, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(100)).await;

    TestGateway {
        addr,
        admin_addr,
        client: reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .no_proxy()
            .build()
            .unwrap(),
        _shutdown: shutdown,
    }
}
