//! Request scoring against the signature table.

use regex::Regex;

use crate::config::DetectionConfig;
use crate::detection::rules::{
    compile_enabled, Rule, ATTACK_TOOL_UA, OVERSIZED_WEIGHT, SCRIPTED_CLIENT_UA,
    UA_ATTACK_TOOL_WEIGHT, UA_MISSING_WEIGHT, UA_SCRIPTED_WEIGHT,
};
use crate::detection::snapshot::RequestSnapshot;
use crate::detection::types::{DetectionError, ThreatCategory, ThreatFinding, ThreatScore};

/// Longest excerpt of a matched input copied into a finding.
const EXCERPT_CHARS: usize = 64;

/// Stateless scorer. Cheap to share; holds only compiled rules.
#[derive(Debug, Clone)]
pub struct ThreatScorer {
    rules: Vec<Rule>,
    attack_tool_ua: Option<Regex>,
    scripted_client_ua: Option<Regex>,
    max_payload_bytes: Option<usize>,
}

impl ThreatScorer {
    pub fn new(config: &DetectionConfig) -> Result<Self, DetectionError> {
        let (attack_tool_ua, scripted_client_ua) = if config.user_agent {
            (
                Some(compile_ua("ua-attack-tool", ATTACK_TOOL_UA)?),
                Some(compile_ua("ua-scripted-client", SCRIPTED_CLIENT_UA)?),
            )
        } else {
            (None, None)
        };

        Ok(Self {
            rules: compile_enabled(config)?,
            attack_tool_ua,
            scripted_client_ua,
            max_payload_bytes: config.payload_size.then_some(config.max_payload_bytes),
        })
    }

    /// Score a request. Pure: the same snapshot always yields the same score.
    pub fn score(&self, request: &RequestSnapshot) -> ThreatScore {
        let mut findings = Vec::new();

        for (location, value) in request.body_strings() {
            self.match_patterns(&location, value, &mut findings);
        }
        for (key, value) in &request.query {
            self.match_patterns(&format!("query.{key}"), value, &mut findings);
        }
        self.match_patterns("url", &request.url, &mut findings);

        self.check_user_agent(request, &mut findings);
        self.check_size(request, &mut findings);

        ThreatScore::from_findings(findings)
    }

    fn match_patterns(&self, location: &str, input: &str, findings: &mut Vec<ThreatFinding>) {
        if input.is_empty() {
            return;
        }
        for rule in self.rules.iter().filter(|r| r.matches(input)) {
            findings.push(ThreatFinding::new(
                rule.def.category,
                rule.def.id,
                rule.def.weight,
                format!(
                    "{} in {}: {}",
                    rule.def.description,
                    location,
                    excerpt(input)
                ),
            ));
        }
    }

    fn check_user_agent(&self, request: &RequestSnapshot, findings: &mut Vec<ThreatFinding>) {
        let (Some(attack_tool), Some(scripted)) = (&self.attack_tool_ua, &self.scripted_client_ua)
        else {
            return;
        };

        match request.user_agent().map(str::trim) {
            None | Some("") => findings.push(ThreatFinding::new(
                ThreatCategory::SuspiciousUa,
                "ua-missing",
                UA_MISSING_WEIGHT,
                "missing or empty user-agent",
            )),
            Some(ua) if attack_tool.is_match(ua) => findings.push(ThreatFinding::new(
                ThreatCategory::SuspiciousUa,
                "ua-attack-tool",
                UA_ATTACK_TOOL_WEIGHT,
                format!("attack tool user-agent: {}", excerpt(ua)),
            )),
            Some(ua) if scripted.is_match(ua) => findings.push(ThreatFinding::new(
                ThreatCategory::SuspiciousUa,
                "ua-scripted-client",
                UA_SCRIPTED_WEIGHT,
                format!("scripted client user-agent: {}", excerpt(ua)),
            )),
            Some(_) => {}
        }
    }

    fn check_size(&self, request: &RequestSnapshot, findings: &mut Vec<ThreatFinding>) {
        let Some(limit) = self.max_payload_bytes else {
            return;
        };
        let size = request
            .content_length()
            .unwrap_or(0)
            .max(request.body_len);
        if size > limit {
            findings.push(ThreatFinding::new(
                ThreatCategory::OversizedPayload,
                "payload-oversized",
                OVERSIZED_WEIGHT,
                format!("payload of {size} bytes exceeds {limit}"),
            ));
        }
    }
}

fn compile_ua(id: &'static str, pattern: &str) -> Result<Regex, DetectionError> {
    Regex::new(pattern).map_err(|source| DetectionError::BadPattern { id, source })
}

fn excerpt(input: &str) -> String {
    if input.chars().count() <= EXCERPT_CHARS {
        input.to_string()
    } else {
        let cut: String = input.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}…")
    }
}
