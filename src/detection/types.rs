//! Threat finding types.

use serde::Serialize;
use thiserror::Error;

/// Attack class a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatCategory {
    SqlInjection,
    Xss,
    PathTraversal,
    SuspiciousUa,
    OversizedPayload,
    BruteForceRate,
    CsrfMissing,
}

impl ThreatCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::SqlInjection => "SQL_INJECTION",
            ThreatCategory::Xss => "XSS",
            ThreatCategory::PathTraversal => "PATH_TRAVERSAL",
            ThreatCategory::SuspiciousUa => "SUSPICIOUS_UA",
            ThreatCategory::OversizedPayload => "OVERSIZED_PAYLOAD",
            ThreatCategory::BruteForceRate => "BRUTE_FORCE_RATE",
            ThreatCategory::CsrfMissing => "CSRF_MISSING",
        }
    }
}

impl std::fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signal raised against a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatFinding {
    pub category: ThreatCategory,
    /// Identifier of the rule that fired.
    pub rule_id: &'static str,
    pub weight: u32,
    /// Where and what matched. Audit only, never sent to the client.
    pub detail: String,
}

impl ThreatFinding {
    pub fn new(
        category: ThreatCategory,
        rule_id: &'static str,
        weight: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            category,
            rule_id,
            weight,
            detail: detail.into(),
        }
    }
}

/// Scorer output for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreatScore {
    pub findings: Vec<ThreatFinding>,
    pub total: u32,
}

impl ThreatScore {
    pub fn from_findings(findings: Vec<ThreatFinding>) -> Self {
        let total = findings
            .iter()
            .fold(0u32, |acc, f| acc.saturating_add(f.weight));
        Self { findings, total }
    }
}

/// Findings accumulated for a single in-flight request.
///
/// Inserted into the request extensions so application handlers and the
/// audit sink see the same view. Never persisted by the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SecurityThreatContext {
    findings: Vec<ThreatFinding>,
}

impl SecurityThreatContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: ThreatFinding) {
        self.findings.push(finding);
    }

    pub fn absorb(&mut self, score: ThreatScore) {
        self.findings.extend(score.findings);
    }

    pub fn findings(&self) -> &[ThreatFinding] {
        &self.findings
    }

    pub fn total_score(&self) -> u32 {
        self.findings
            .iter()
            .fold(0u32, |acc, f| acc.saturating_add(f.weight))
    }

    pub fn count(&self, category: ThreatCategory) -> usize {
        self.findings
            .iter()
            .filter(|f| f.category == category)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Errors building the scorer.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("rule `{id}` has an invalid pattern: {source}")]
    BadPattern {
        id: &'static str,
        #[source]
        source: regex::Error,
    },
}
