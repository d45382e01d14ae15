//! Threat model — a single detected malicious signal with a
//! confidence-derived severity level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Attack classes the engine detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    BruteForce,
    CredentialStuffing,
    SqlInjection,
    NoSqlInjection,
    CommandInjection,
    LdapInjection,
    XpathInjection,
    TemplateInjection,
    Xss,
    Ddos,
    VoteManipulation,
    SessionHijacking,
    DataExfiltration,
}

impl ThreatType {
    /// Whether this attack class is aimed at accounts, making a non-IP
    /// target an affected user rather than a resource.
    pub fn targets_accounts(self) -> bool {
        matches!(
            self,
            ThreatType::BruteForce
                | ThreatType::CredentialStuffing
                | ThreatType::SessionHijacking
                | ThreatType::DataExfiltration
                | ThreatType::VoteManipulation
        )
    }
}

impl std::fmt::Display for ThreatType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatType::BruteForce => "brute_force",
            ThreatType::CredentialStuffing => "credential_stuffing",
            ThreatType::SqlInjection => "sql_injection",
            ThreatType::NoSqlInjection => "nosql_injection",
            ThreatType::CommandInjection => "command_injection",
            ThreatType::LdapInjection => "ldap_injection",
            ThreatType::XpathInjection => "xpath_injection",
            ThreatType::TemplateInjection => "template_injection",
            ThreatType::Xss => "xss",
            ThreatType::Ddos => "ddos",
            ThreatType::VoteManipulation => "vote_manipulation",
            ThreatType::SessionHijacking => "session_hijacking",
            ThreatType::DataExfiltration => "data_exfiltration",
        };
        write!(f, "{s}")
    }
}

/// Threat severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Map a detector confidence score to a level.
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.8 {
            ThreatLevel::High
        } else if confidence > 0.5 {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThreatLevel::Low => write!(f, "low"),
            ThreatLevel::Medium => write!(f, "medium"),
            ThreatLevel::High => write!(f, "high"),
            ThreatLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Kind of evidence an indicator carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorKind {
    Pattern,
    Ip,
    Behavior,
}

/// A single evidence fragment attached to a threat. Never stored on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatIndicator {
    pub kind: IndicatorKind,
    pub value: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

/// Lifecycle of a threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatStatus {
    Active,
    Resolved,
}

/// A detected malicious signal.
///
/// Immutable once produced, except `status` and `mitigation_actions` which
/// the remediation engine appends to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Threat {
    pub id: String,
    pub threat_type: ThreatType,
    pub level: ThreatLevel,
    /// Where the signal came from (IP, user id, field path).
    pub source: String,
    /// What the signal was aimed at.
    pub target: String,
    pub detected_at: DateTime<Utc>,
    pub description: String,
    /// Ordered evidence fragments.
    pub indicators: Vec<ThreatIndicator>,
    pub status: ThreatStatus,
    /// Actions the remediation engine took against this threat.
    #[serde(default)]
    pub mitigation_actions: Vec<String>,
}

impl Threat {
    pub fn new(
        threat_type: ThreatType,
        level: ThreatLevel,
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            threat_type,
            level,
            source: source.into(),
            target: target.into(),
            detected_at: Utc::now(),
            description: description.into(),
            indicators: Vec::new(),
            status: ThreatStatus::Active,
            mitigation_actions: Vec::new(),
        }
    }

    pub fn with_indicator(mut self, indicator: ThreatIndicator) -> Self {
        self.indicators.push(indicator);
        self
    }

    pub fn resolve(&mut self) {
        self.status = ThreatStatus::Resolved;
    }
}
