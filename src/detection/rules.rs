//! Declarative signature table.
//!
//! Each entry is independent: adding or retuning a rule never touches the
//! scoring control flow in `scorer.rs`.

use regex::Regex;

use crate::config::DetectionConfig;
use crate::detection::types::{DetectionError, ThreatCategory};

/// Static definition of a pattern rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleDef {
    pub id: &'static str,
    pub category: ThreatCategory,
    pub description: &'static str,
    pub pattern: &'static str,
    pub weight: u32,
    /// How likely a match is a real attack, 0.0–1.0. Informational.
    pub confidence: f32,
}

/// Pattern rules applied to body values, query values and the raw URL.
pub const PATTERN_RULES: &[RuleDef] = &[
    RuleDef {
        id: "sqli-tautology",
        category: ThreatCategory::SqlInjection,
        description: "SQL tautology",
        pattern: r#"(?i)['"]\s*(?:or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+|\bor\s+\d+\s*=\s*\d+"#,
        weight: 50,
        confidence: 0.9,
    },
    RuleDef {
        id: "sqli-union-select",
        category: ThreatCategory::SqlInjection,
        description: "UNION-based SQL injection",
        pattern: r"(?i)\bunion\b(?:\s+all)?\s+select\b",
        weight: 50,
        confidence: 0.95,
    },
    RuleDef {
        id: "sqli-stacked-statement",
        category: ThreatCategory::SqlInjection,
        description: "stacked destructive SQL statement",
        pattern: r"(?i);\s*(?:drop|truncate|alter|delete|insert|update)\s+\w",
        weight: 50,
        confidence: 0.9,
    },
    RuleDef {
        id: "sqli-comment",
        category: ThreatCategory::SqlInjection,
        description: "SQL comment terminator",
        pattern: r"(?s)'\s*(?:--|#)|/\*.*?\*/",
        weight: 40,
        confidence: 0.7,
    },
    RuleDef {
        id: "sqli-time-function",
        category: ThreatCategory::SqlInjection,
        description: "time-based SQL function",
        pattern: r"(?i)\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
        weight: 40,
        confidence: 0.8,
    },
    RuleDef {
        id: "xss-script-tag",
        category: ThreatCategory::Xss,
        description: "script tag",
        pattern: r"(?i)<\s*script\b",
        weight: 40,
        confidence: 0.95,
    },
    RuleDef {
        id: "xss-event-handler",
        category: ThreatCategory::Xss,
        description: "inline event handler",
        pattern: r"(?i)\bon(?:error|load|click|mouseover|focus|blur|submit)\s*=",
        weight: 40,
        confidence: 0.85,
    },
    RuleDef {
        id: "xss-javascript-uri",
        category: ThreatCategory::Xss,
        description: "javascript: URI",
        pattern: r"(?i)javascript\s*:",
        weight: 40,
        confidence: 0.85,
    },
    RuleDef {
        id: "xss-embedded-frame",
        category: ThreatCategory::Xss,
        description: "embedded frame or object",
        pattern: r"(?i)<\s*(?:iframe|object|embed)\b",
        weight: 30,
        confidence: 0.7,
    },
    RuleDef {
        id: "traversal-dot-dot",
        category: ThreatCategory::PathTraversal,
        description: "directory traversal sequence",
        pattern: r"\.\.[/\\]",
        weight: 30,
        confidence: 0.8,
    },
    RuleDef {
        id: "traversal-encoded",
        category: ThreatCategory::PathTraversal,
        description: "encoded directory traversal",
        pattern: r"(?i)(?:%2e|%252e){2}(?:%2f|%5c|%252f|/|\\)|\.\.(?:%2f|%5c|%252f)",
        weight: 30,
        confidence: 0.85,
    },
];

/// User agents of known attack tooling.
pub const ATTACK_TOOL_UA: &str =
    r"(?i)sqlmap|nikto|nmap|masscan|dirbuster|gobuster|wpscan|acunetix|nessus|havij|zgrab|nuclei";

/// User agents of scripted HTTP clients.
pub const SCRIPTED_CLIENT_UA: &str =
    r"(?i)^(?:curl|wget|python-requests|python-urllib|go-http-client|java/|libwww-perl|scrapy|httpclient)";

pub const UA_MISSING_WEIGHT: u32 = 10;
pub const UA_ATTACK_TOOL_WEIGHT: u32 = 20;
pub const UA_SCRIPTED_WEIGHT: u32 = 10;
pub const OVERSIZED_WEIGHT: u32 = 15;

/// A compiled pattern rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub def: RuleDef,
    pub regex: Regex,
}

impl Rule {
    pub fn compile(def: RuleDef) -> Result<Self, DetectionError> {
        let regex = Regex::new(def.pattern)
            .map_err(|source| DetectionError::BadPattern { id: def.id, source })?;
        Ok(Self { def, regex })
    }

    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }
}

/// Whether the configuration turns a category's pattern rules on.
pub fn category_enabled(config: &DetectionConfig, category: ThreatCategory) -> bool {
    match category {
        ThreatCategory::SqlInjection => config.sql_injection,
        ThreatCategory::Xss => config.xss,
        ThreatCategory::PathTraversal => config.path_traversal,
        ThreatCategory::SuspiciousUa => config.user_agent,
        ThreatCategory::OversizedPayload => config.payload_size,
        ThreatCategory::BruteForceRate | ThreatCategory::CsrfMissing => true,
    }
}

/// Compile the pattern rules enabled by `config`.
pub fn compile_enabled(config: &DetectionConfig) -> Result<Vec<Rule>, DetectionError> {
    PATTERN_RULES
        .iter()
        .filter(|def| category_enabled(config, def.category))
        .map(|def| Rule::compile(*def))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str) -> Rule {
        let def = PATTERN_RULES
            .iter()
            .find(|d| d.id == id)
            .copied()
            .unwrap();
        Rule::compile(def).unwrap()
    }

    #[test]
    fn test_every_rule_compiles() {
        for def in PATTERN_RULES {
            assert!(Rule::compile(*def).is_ok(), "rule {} failed", def.id);
        }
        assert!(Regex::new(ATTACK_TOOL_UA).is_ok());
        assert!(Regex::new(SCRIPTED_CLIENT_UA).is_ok());
    }

    #[test]
    fn test_rule_ids_are_unique() {
        let mut ids: Vec<_> = PATTERN_RULES.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), PATTERN_RULES.len());
    }

    #[test]
    fn test_sqli_tautology() {
        let r = rule("sqli-tautology");
        assert!(r.matches("' OR '1'='1"));
        assert!(r.matches("admin\" or \"a\"=\"a"));
        assert!(r.matches("1 OR 1=1"));
        assert!(!r.matches("Tom O'Reilly"));
        assert!(!r.matches("black or white"));
    }

    #[test]
    fn test_sqli_union_select() {
        let r = rule("sqli-union-select");
        assert!(r.matches("1 UNION SELECT password FROM users"));
        assert!(r.matches("x union all select 1"));
        assert!(!r.matches("the union selected a leader"));
    }

    #[test]
    fn test_sqli_stacked_statement() {
        let r = rule("sqli-stacked-statement");
        assert!(r.matches("1; DROP TABLE users"));
        assert!(r.matches("x';delete from accounts"));
        assert!(!r.matches("drop table"));
        assert!(!r.matches("milk; eggs; bread"));
    }

    #[test]
    fn test_sqli_comment() {
        let r = rule("sqli-comment");
        assert!(r.matches("admin'--"));
        assert!(r.matches("admin' #"));
        assert!(r.matches("SEL/**/ECT"));
        assert!(!r.matches("pages 10--20"));
    }

    #[test]
    fn test_sqli_time_function() {
        let r = rule("sqli-time-function");
        assert!(r.matches("1 AND SLEEP(5)"));
        assert!(r.matches("'; WAITFOR DELAY '0:0:5'"));
        assert!(!r.matches("I need sleep"));
    }

    #[test]
    fn test_xss_rules() {
        assert!(rule("xss-script-tag").matches("<script>alert(1)</script>"));
        assert!(rule("xss-script-tag").matches("< SCRIPT src=x>"));
        assert!(!rule("xss-script-tag").matches("description of a script"));

        assert!(rule("xss-event-handler").matches("<img src=x onerror=alert(1)>"));
        assert!(!rule("xss-event-handler").matches("one rror"));

        assert!(rule("xss-javascript-uri").matches("JavaScript:alert(1)"));
        assert!(rule("xss-embedded-frame").matches("<iframe src=//evil>"));
    }

    #[test]
    fn test_traversal_rules() {
        let plain = rule("traversal-dot-dot");
        assert!(plain.matches("../../etc/passwd"));
        assert!(plain.matches("..\\windows\\system32"));
        assert!(!plain.matches("version 1..2"));

        let encoded = rule("traversal-encoded");
        assert!(encoded.matches("/files/%2e%2e%2fetc%2fpasswd"));
        assert!(encoded.matches("/files/..%2fsecret"));
        assert!(encoded.matches("%252e%252e%252f"));
        assert!(!encoded.matches("/files/report%2epdf"));
    }

    #[test]
    fn test_disabled_categories_are_skipped() {
        let config = DetectionConfig {
            xss: false,
            path_traversal: false,
            ..DetectionConfig::default()
        };
        let rules = compile_enabled(&config).unwrap();
        assert!(!rules.is_empty());
        assert!(rules
            .iter()
            .all(|r| r.def.category == ThreatCategory::SqlInjection));
    }
}
