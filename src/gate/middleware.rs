//! Gate middleware.
//! Buffers the body, decides, and feeds login outcomes back.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::defense::LoginGuard;
use crate::detection::RequestSnapshot;
use crate::gate::decision::Decision;
use crate::gate::gatekeeper::Gatekeeper;

/// State shared by the middleware.
#[derive(Clone)]
pub struct GateState {
    pub gatekeeper: Arc<Gatekeeper>,
    pub login: LoginGuard,
    pub trust_forwarded_for: bool,
}

pub async fn defense_middleware(
    State(state): State<GateState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let limit = state.gatekeeper.policy().detection.max_buffer_bytes;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let ip = client_ip(&parts, state.trust_forwarded_for);
    let snapshot = RequestSnapshot::from_parts(&parts, &bytes, ip);

    let mut verdict = state.gatekeeper.evaluate(&snapshot).await;
    let attempt = if verdict.decision.is_allow() {
        state.login.attempt(&snapshot)
    } else {
        None
    };
    if let Some(attempt) = &attempt {
        verdict.decision = state.login.precheck(attempt, &mut verdict.context).await;
    }

    state.gatekeeper.conclude(&request_id, &snapshot, &verdict);
    if let Decision::Block(code) = verdict.decision {
        return code.into_response();
    }

    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(verdict.context);
    let response = next.run(request).await;

    if let Some(attempt) = attempt {
        state.login.record_outcome(&attempt, response.status()).await;
    }
    response
}

/// Source IP of the request.
///
/// The first `X-Forwarded-For` hop is used only when trusted; otherwise the
/// peer address, if the server recorded one.
fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}
