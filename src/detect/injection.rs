//! Stateless injection detectors — pure, synchronous pattern classifiers.
//!
//! Each class-specific detector matches an input string against a fixed
//! pattern table and reports a confidence of
//! `min(base + matches * increment, cap)` with per-class constants. The
//! detectors sit on the request path: no I/O, no allocation beyond the
//! result, and they never fail — unparseable structured input is a
//! non-match for that sub-check only.

use crate::threat::{
    IndicatorKind, Threat, ThreatIndicator, ThreatLevel, ThreatStatus, ThreatType,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Outcome of a class-specific detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub detected: bool,
    pub threat_type: Option<ThreatType>,
    /// Names of the patterns that matched, in table order.
    pub matched_patterns: Vec<String>,
    pub confidence: f64,
    /// Input with the matched fragments stripped.
    pub sanitized_value: Option<String>,
}

impl Detection {
    fn none() -> Self {
        Self {
            detected: false,
            threat_type: None,
            matched_patterns: Vec::new(),
            confidence: 0.0,
            sanitized_value: None,
        }
    }
}

struct PatternClass {
    threat_type: ThreatType,
    base: f64,
    increment: f64,
    cap: f64,
    patterns: Vec<(&'static str, Regex)>,
}

impl PatternClass {
    fn detect(&self, input: &str) -> Detection {
        let mut matched = Vec::new();
        for (name, pattern) in &self.patterns {
            if pattern.is_match(input) {
                matched.push((*name).to_string());
            }
        }
        self.finish(input, matched)
    }

    fn finish(&self, input: &str, matched: Vec<String>) -> Detection {
        if matched.is_empty() {
            return Detection::none();
        }
        let confidence = (self.base + matched.len() as f64 * self.increment).min(self.cap);
        let mut sanitized = input.to_string();
        for (name, pattern) in &self.patterns {
            if matched.iter().any(|m| m == name) {
                sanitized = pattern.replace_all(&sanitized, "").into_owned();
            }
        }
        Detection {
            detected: true,
            threat_type: Some(self.threat_type),
            matched_patterns: matched,
            confidence,
            sanitized_value: Some(sanitized),
        }
    }
}

fn rx(pattern: &str) -> Regex {
    // Table patterns are literals; a failure here is a programming error.
    Regex::new(pattern).unwrap()
}

static SQL: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::SqlInjection,
    base: 0.30,
    increment: 0.15,
    cap: 0.95,
    patterns: vec![
        ("quoted-or-equality", rx(r#"(?i)'\s*or\s*'[^']*'\s*=\s*'"#)),
        ("boolean-tautology", rx(r#"(?i)\b(or|and)\s+\d+\s*=\s*\d+"#)),
        ("union-select", rx(r#"(?i)\bunion\b[\s\S]*\bselect\b"#)),
        ("stacked-statement", rx(r#"(?i);\s*(drop|delete|truncate|insert|update)\b"#)),
        ("comment-terminator", rx(r#"(--|#)\s*$|/\*[\s\S]*\*/"#)),
        ("dml-keyword-pair", rx(r#"(?i)\b(select|insert|update|delete)\b[\s\S]+\b(from|into|set|where)\b"#)),
        ("exec-call", rx(r#"(?i)\b(exec(ute)?|xp_cmdshell)\s*[(\s]"#)),
        ("time-based-probe", rx(r#"(?i)\b(sleep|benchmark|waitfor\s+delay)\s*\("#)),
    ],
});

static NOSQL: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::NoSqlInjection,
    base: 0.40,
    increment: 0.20,
    cap: 0.95,
    patterns: vec![
        ("where-operator", rx(r#"\$where\b"#)),
        ("comparison-operator", rx(r#"\$(ne|gt|gte|lt|lte|in|nin)\b"#)),
        ("logical-operator", rx(r#"\$(or|and|nor|not)\b"#)),
        ("regex-operator", rx(r#"\$regex\b"#)),
        ("expr-operator", rx(r#"\$(expr|function|accumulator)\b"#)),
    ],
});

static COMMAND: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::CommandInjection,
    base: 0.40,
    increment: 0.15,
    cap: 0.95,
    patterns: vec![
        ("chained-command", rx(r#"[;&|]\s*(cat|ls|rm|wget|curl|nc|bash|sh|python|perl|chmod|chown)\b"#)),
        ("command-substitution", rx(r#"`[^`]+`|\$\([^)]+\)"#)),
        ("pipe-to-shell", rx(r#"\|\s*(sh|bash|zsh)\b"#)),
        ("remote-fetch", rx(r#"(?i)\b(wget|curl)\s+(-\S+\s+)*https?://"#)),
        ("sensitive-path", rx(r#"/etc/(passwd|shadow|hosts)\b"#)),
        ("output-redirect", rx(r#">+\s*/(dev|etc|tmp)/"#)),
    ],
});

static LDAP: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::LdapInjection,
    base: 0.30,
    increment: 0.20,
    cap: 0.90,
    patterns: vec![
        ("wildcard-filter", rx(r#"\*\)"#)),
        ("filter-chaining", rx(r#"\)\s*\(\s*[|&!]"#)),
        ("injected-attribute", rx(r#"(?i)[)(|&]\s*\(\s*(cn|uid|objectclass|mail)\s*="#)),
        ("null-byte", rx(r#"\x00|%00"#)),
    ],
});

static XPATH: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::XpathInjection,
    base: 0.30,
    increment: 0.20,
    cap: 0.90,
    patterns: vec![
        ("node-wildcard", rx(r#"//\*|/\*\[|\]\s*\[|//\w+\["#)),
        ("string-tautology", rx(r#"(?i)'\s*or\s*''\s*=\s*'"#)),
        ("position-probe", rx(r#"(?i)\b(position|last|count|string-length)\s*\(\s*\)?"#)),
        ("axis-traversal", rx(r#"(?i)\b(ancestor|descendant|following|preceding)(-or-self)?::"#)),
    ],
});

static TEMPLATE: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::TemplateInjection,
    base: 0.40,
    increment: 0.20,
    cap: 0.95,
    patterns: vec![
        ("mustache-expression", rx(r#"\{\{[\s\S]+\}\}"#)),
        ("dollar-interpolation", rx(r#"\$\{[\s\S]+\}"#)),
        ("erb-tag", rx(r#"<%[\s\S]+%>"#)),
        ("jinja-statement", rx(r#"\{%[\s\S]+%\}"#)),
        ("prototype-probe", rx(r#"__proto__|constructor\s*\["#)),
    ],
});

static XSS: LazyLock<PatternClass> = LazyLock::new(|| PatternClass {
    threat_type: ThreatType::Xss,
    base: 0.40,
    increment: 0.15,
    cap: 0.95,
    patterns: vec![
        ("script-tag", rx(r#"(?i)<\s*script\b"#)),
        ("javascript-uri", rx(r#"(?i)javascript\s*:"#)),
        ("event-handler", rx(r#"(?i)\bon(error|load|click|mouseover|focus|submit)\s*="#)),
        ("iframe-embed", rx(r#"(?i)<\s*(iframe|object|embed)\b"#)),
        ("svg-onload", rx(r#"(?i)<\s*svg\b[^>]*onload"#)),
    ],
});

pub fn detect_sql_injection(input: &str) -> Detection {
    SQL.detect(input)
}

/// NoSQL operator detection. If the input parses as JSON, the object keys
/// are probed for operators too; parse failure is a non-match for that
/// sub-check, not an error.
pub fn detect_nosql_injection(input: &str) -> Detection {
    let mut matched: Vec<String> = NOSQL
        .patterns
        .iter()
        .filter(|(_, p)| p.is_match(input))
        .map(|(name, _)| (*name).to_string())
        .collect();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(input) {
        let mut keys = Vec::new();
        collect_operator_keys(&value, &mut keys);
        for key in keys {
            let name = format!("json-key:{key}");
            if !matched.contains(&name) {
                matched.push(name);
            }
        }
    }

    NOSQL.finish(input, matched)
}

fn collect_operator_keys(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                if key.starts_with('$') {
                    out.push(key.clone());
                }
                collect_operator_keys(nested, out);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_operator_keys(item, out);
            }
        }
        _ => {}
    }
}

pub fn detect_command_injection(input: &str) -> Detection {
    COMMAND.detect(input)
}

pub fn detect_ldap_injection(input: &str) -> Detection {
    LDAP.detect(input)
}

pub fn detect_xpath_injection(input: &str) -> Detection {
    XPATH.detect(input)
}

pub fn detect_template_injection(input: &str) -> Detection {
    TEMPLATE.detect(input)
}

pub fn detect_xss(input: &str) -> Detection {
    XSS.detect(input)
}

fn all_detections(input: &str) -> Vec<Detection> {
    vec![
        detect_sql_injection(input),
        detect_nosql_injection(input),
        detect_command_injection(input),
        detect_ldap_injection(input),
        detect_xpath_injection(input),
        detect_template_injection(input),
        detect_xss(input),
    ]
    .into_iter()
    .filter(|d| d.detected)
    .collect()
}

/// Run every injection detector and fold the matches into a single threat.
///
/// The returned threat carries the highest-confidence classification;
/// every other matching class is preserved as an indicator. Returns `None`
/// when nothing matches.
pub fn detect_all_injections(input: &str) -> Option<Threat> {
    let detections = all_detections(input);
    let winner = detections
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

    let threat_type = winner.threat_type.expect("detected implies a type");
    let level = ThreatLevel::from_confidence(winner.confidence);
    let mut threat = Threat {
        id: uuid::Uuid::new_v4().to_string(),
        threat_type,
        level,
        // No network source at this layer; scan_body fills in the field
        // path as the target.
        source: String::new(),
        target: String::new(),
        detected_at: chrono::Utc::now(),
        description: format!(
            "{threat_type} pattern match (confidence {:.2})",
            winner.confidence
        ),
        indicators: Vec::new(),
        status: ThreatStatus::Active,
        mitigation_actions: Vec::new(),
    };
    for detection in &detections {
        let mut context = HashMap::new();
        context.insert(
            "matched_patterns".to_string(),
            detection.matched_patterns.join(","),
        );
        threat.indicators.push(ThreatIndicator {
            kind: IndicatorKind::Pattern,
            value: detection
                .threat_type
                .expect("detected implies a type")
                .to_string(),
            confidence: detection.confidence,
            context,
        });
    }
    Some(threat)
}

/// Recursively scan a structured body, producing one threat per offending
/// field, tagged with its dotted path.
pub fn scan_body(body: &serde_json::Value) -> Vec<Threat> {
    let mut threats = Vec::new();
    walk(body, String::new(), &mut threats);
    threats
}

fn walk(value: &serde_json::Value, path: String, threats: &mut Vec<Threat>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(nested, child, threats);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, format!("{path}[{i}]"), threats);
            }
        }
        serde_json::Value::String(s) => {
            if let Some(mut threat) = detect_all_injections(s) {
                threat.target = path.clone();
                for indicator in &mut threat.indicators {
                    indicator.context.insert("field_path".to_string(), path.clone());
                }
                threats.push(threat);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sql_classic_tautology() {
        let detection = detect_sql_injection("' OR '1'='1");
        assert!(detection.detected);
        assert!(detection.confidence >= 0.3);
        assert_eq!(detection.threat_type, Some(ThreatType::SqlInjection));
    }

    #[test]
    fn sql_benign_text_is_clean() {
        let detection = detect_sql_injection("Contact us at a@b.com");
        assert!(!detection.detected);
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn sql_confidence_grows_with_matches_and_caps() {
        let one = detect_sql_injection("' OR '1'='1");
        let many = detect_sql_injection(
            "' OR '1'='1' UNION SELECT password FROM users; DROP TABLE users; -- sleep(5)",
        );
        assert!(many.confidence > one.confidence);
        assert!(many.confidence <= 0.95);
    }

    #[test]
    fn nosql_operator_in_json() {
        let detection = detect_nosql_injection(r#"{"username": {"$ne": null}}"#);
        assert!(detection.detected);
        assert!(detection.confidence >= 0.4);
        assert!(
            detection
                .matched_patterns
                .iter()
                .any(|p| p.starts_with("json-key:"))
        );
    }

    #[test]
    fn nosql_non_json_probe_does_not_error() {
        let detection = detect_nosql_injection("not json at all");
        assert!(!detection.detected);
    }

    #[test]
    fn command_injection_chained() {
        let detection = detect_command_injection("foo; rm -rf / | bash");
        assert!(detection.detected);
        assert_eq!(detection.threat_type, Some(ThreatType::CommandInjection));
    }

    #[test]
    fn ldap_filter_chaining() {
        let detection = detect_ldap_injection("*)(uid=*))(|(uid=*");
        assert!(detection.detected);
        assert!(detection.confidence <= 0.90);
    }

    #[test]
    fn xpath_tautology() {
        let detection = detect_xpath_injection("' or ''='");
        assert!(detection.detected);
    }

    #[test]
    fn template_expression() {
        let detection = detect_template_injection("{{7*7}}");
        assert!(detection.detected);
        assert_eq!(detection.threat_type, Some(ThreatType::TemplateInjection));
    }

    #[test]
    fn xss_script_tag() {
        let detection = detect_xss("<script>alert(1)</script>");
        assert!(detection.detected);
    }

    #[test]
    fn combinator_returns_highest_confidence_with_all_classes() {
        // Matches both SQL and template patterns.
        let threat = detect_all_injections("' OR '1'='1' {{ payload }} ${ x }").unwrap();
        let classes: Vec<&str> = threat
            .indicators
            .iter()
            .map(|i| i.value.as_str())
            .collect();
        assert!(classes.contains(&"sql_injection"));
        assert!(classes.contains(&"template_injection"));

        // Winner is the best-scoring class.
        let winner_conf = threat
            .indicators
            .iter()
            .map(|i| i.confidence)
            .fold(0.0_f64, f64::max);
        let winner = threat
            .indicators
            .iter()
            .find(|i| i.confidence == winner_conf)
            .unwrap();
        assert_eq!(threat.threat_type.to_string(), winner.value);
    }

    #[test]
    fn combinator_clean_input() {
        assert!(detect_all_injections("hello world").is_none());
    }

    #[test]
    fn combinator_level_mapping() {
        let low = detect_all_injections("' OR '1'='1").unwrap();
        assert_eq!(low.level, ThreatLevel::Low);

        let medium = detect_all_injections("' OR '1'='1' UNION SELECT x FROM y").unwrap();
        assert_eq!(medium.level, ThreatLevel::Medium);

        let high = detect_all_injections(
            "' OR '1'='1' UNION SELECT x FROM y; DROP TABLE z; -- sleep(1)",
        )
        .unwrap();
        assert_eq!(high.level, ThreatLevel::High);
    }

    #[test]
    fn body_scan_tags_field_paths() {
        let body = serde_json::json!({
            "user": {
                "name": "alice",
                "bio": "<script>alert(1)</script>"
            },
            "comments": ["fine", "' OR '1'='1"]
        });
        let threats = scan_body(&body);
        assert_eq!(threats.len(), 2);

        let targets: Vec<&str> = threats.iter().map(|t| t.target.as_str()).collect();
        assert!(targets.contains(&"user.bio"));
        assert!(targets.contains(&"comments[1]"));
    }

    #[test]
    fn body_scan_clean_body() {
        let body = serde_json::json!({"a": 1, "b": {"c": "plain text"}});
        assert!(scan_body(&body).is_empty());
    }

    #[test]
    fn sanitized_value_strips_matches() {
        let detection = detect_xss("hello <script>alert(1)</script>");
        let sanitized = detection.sanitized_value.unwrap();
        assert!(!sanitized.to_lowercase().contains("<script"));
    }
}
