use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::config::FailurePolicy;
use crate::defense::{IpThrottleState, LockoutState, LockoutStatus, ThrottleReason};
use crate::gate::{BlockCode, GateStatsSnapshot};
use crate::store::StoreError;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub failure_policy: FailurePolicy,
    pub max_suspicious_score: u32,
    pub requests: GateStatsSnapshot,
}

#[derive(Serialize)]
pub struct IdentityReport {
    pub identity: String,
    pub status: LockoutStatus,
    pub state: LockoutState,
}

#[derive(Serialize)]
pub struct IpReport {
    pub ip: IpAddr,
    pub suspicious: bool,
    pub throttle: IpThrottleState,
}

#[derive(Deserialize)]
pub struct BlockRequest {
    pub minutes: u64,
}

fn store_failure(e: StoreError) -> Response {
    tracing::error!(error = %e, "Admin request failed on store");
    BlockCode::ServiceUnavailable.into_response()
}

fn parse_ip(raw: &str) -> Result<IpAddr, Response> {
    raw.parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid IP address: {raw}")).into_response())
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        failure_policy: state.failure_policy,
        max_suspicious_score: state.gatekeeper.policy().detection.max_suspicious_score,
        requests: state.gatekeeper.stats(),
    })
}

pub async fn get_lockout(
    State(state): State<AdminState>,
    Path(identity): Path<String>,
) -> Result<Json<IdentityReport>, Response> {
    let status = state.lockout.check(&identity).await.map_err(store_failure)?;
    let lockout_state = state.lockout.state(&identity).await.map_err(store_failure)?;
    Ok(Json(IdentityReport {
        identity,
        status,
        state: lockout_state,
    }))
}

pub async fn reset_lockout(
    State(state): State<AdminState>,
    Path(identity): Path<String>,
) -> Result<StatusCode, Response> {
    state.lockout.reset(&identity).await.map_err(store_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_ip(
    State(state): State<AdminState>,
    Path(raw): Path<String>,
) -> Result<Json<IpReport>, Response> {
    let ip = parse_ip(&raw)?;
    Ok(Json(IpReport {
        ip,
        suspicious: state.gatekeeper.is_suspicious(ip).await.map_err(store_failure)?,
        throttle: state.gatekeeper.throttle().state(ip).await.map_err(store_failure)?,
    }))
}

pub async fn unblock_ip(
    State(state): State<AdminState>,
    Path(raw): Path<String>,
) -> Result<StatusCode, Response> {
    let ip = parse_ip(&raw)?;
    state.gatekeeper.throttle().unblock(ip).await.map_err(store_failure)?;
    state.gatekeeper.clear_suspicious(ip).await.map_err(store_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn block_ip(
    State(state): State<AdminState>,
    Path(raw): Path<String>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<IpReport>, Response> {
    let ip = parse_ip(&raw)?;
    if body.minutes == 0 {
        return Err((StatusCode::BAD_REQUEST, "minutes must be positive").into_response());
    }
    let throttle = state.gatekeeper.throttle();
    throttle
        .block(ip, body.minutes, ThrottleReason::Manual)
        .await
        .map_err(store_failure)?;
    tracing::info!(ip = %ip, minutes = body.minutes, "IP blocked by administrator");

    Ok(Json(IpReport {
        ip,
        suspicious: state.gatekeeper.is_suspicious(ip).await.map_err(store_failure)?,
        throttle: throttle.state(ip).await.map_err(store_failure)?,
    }))
}
