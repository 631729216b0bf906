//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gate_requests_total` (counter): evaluated requests by decision
//! - `gate_blocks_total` (counter): rejections by block code
//! - `gate_findings_total` (counter): findings by threat category
//! - `gate_store_degraded_total` (counter): store failures absorbed by the fail policy
//! - `defense_lockouts_total` (counter): identity lockouts started
//! - `defense_ip_blocks_total` (counter): IP blocks by reason
//! - `defense_csrf_validations_total` (counter): token checks by result

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(decision: &'static str) {
    metrics::counter!("gate_requests_total", "decision" => decision).increment(1);
}

pub fn record_block(code: &'static str) {
    metrics::counter!("gate_blocks_total", "code" => code).increment(1);
}

pub fn record_finding(category: &'static str) {
    metrics::counter!("gate_findings_total", "category" => category).increment(1);
}

pub fn record_store_degraded(op: &'static str) {
    metrics::counter!("gate_store_degraded_total", "op" => op).increment(1);
}

pub fn record_lockout() {
    metrics::counter!("defense_lockouts_total").increment(1);
}

pub fn record_ip_block(reason: &'static str) {
    metrics::counter!("defense_ip_blocks_total", "reason" => reason).increment(1);
}

pub fn record_csrf_validation(result: &'static str) {
    metrics::counter!("defense_csrf_validations_total", "result" => result).increment(1);
}
