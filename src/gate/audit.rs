//! Audit seam.
//!
//! Persistence of audit records is somebody else's job; the gate only hands
//! each decided request to a sink.

use std::net::IpAddr;

use serde::Serialize;

use crate::detection::ThreatFinding;

/// One decided request.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub ip: Option<IpAddr>,
    pub findings: Vec<ThreatFinding>,
    pub total_score: u32,
    pub decision: &'static str,
    pub block_code: Option<&'static str>,
}

pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, record: &AuditRecord);
}

/// Emits records as structured events on the `audit` target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        // Clean allows are noise.
        if record.findings.is_empty() && record.block_code.is_none() {
            return;
        }
        let findings = record
            .findings
            .iter()
            .map(|f| format!("{}:{}", f.category, f.rule_id))
            .collect::<Vec<_>>()
            .join(",");

        tracing::info!(
            target: "audit",
            request_id = %record.request_id,
            method = %record.method,
            path = %record.path,
            ip = ?record.ip,
            findings = %findings,
            total_score = record.total_score,
            decision = record.decision,
            block_code = record.block_code.unwrap_or("-"),
            "Request decided"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::ThreatCategory;

    #[test]
    fn test_record_serializes_findings() {
        let record = AuditRecord {
            request_id: "req-1".into(),
            method: "POST".into(),
            path: "/search".into(),
            ip: Some("198.51.100.9".parse().unwrap()),
            findings: vec![ThreatFinding::new(
                ThreatCategory::SqlInjection,
                "sqli-tautology",
                50,
                "body.q",
            )],
            total_score: 50,
            decision: "block",
            block_code: Some("SUSPICIOUS_ACTIVITY_DETECTED"),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["findings"][0]["category"], "SQL_INJECTION");
        assert_eq!(json["ip"], "198.51.100.9");
        assert_eq!(json["block_code"], "SUSPICIOUS_ACTIVITY_DETECTED");

        // Sink must not panic for either kind of record.
        TracingAuditSink.record(&record);
        TracingAuditSink.record(&AuditRecord {
            findings: Vec::new(),
            block_code: None,
            ..record
        });
    }
}
