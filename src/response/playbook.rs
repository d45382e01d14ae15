//! Remediation playbooks — ordered, conditionally-gated action sequences
//! keyed by threat type.
//!
//! Step conditions are a small typed predicate (field selector, comparator,
//! integer literal) built and validated at registration time. Malformed
//! condition strings are rejected eagerly instead of silently evaluating to
//! true at run time.

use crate::error::PlaybookError;
use crate::incident::Incident;
use crate::threat::ThreatType;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFailure {
    /// Record the error and proceed to the next step.
    Continue,
    /// Stop the playbook; the run is marked unsuccessful.
    Abort,
    /// Re-invoke up to the configured attempt cap, then abort.
    Retry,
}

/// Integer-valued incident projections a condition can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    AffectedUserCount,
    AffectedResourceCount,
    TimelineLength,
}

impl ConditionField {
    fn project(self, incident: &Incident) -> i64 {
        match self {
            ConditionField::AffectedUserCount => incident.affected_users.len() as i64,
            ConditionField::AffectedResourceCount => incident.affected_resources.len() as i64,
            ConditionField::TimelineLength => incident.timeline.len() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A typed step predicate over incident projections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCondition {
    pub field: ConditionField,
    pub op: Comparator,
    pub value: i64,
}

impl StepCondition {
    pub fn new(field: ConditionField, op: Comparator, value: i64) -> Self {
        Self { field, op, value }
    }

    /// Parse `"<field> <op> <int>"`, e.g. `affected_users.length > 10`.
    pub fn parse(input: &str) -> Result<Self, PlaybookError> {
        let invalid = |message: &str| PlaybookError::InvalidCondition {
            condition: input.to_string(),
            message: message.to_string(),
        };

        let parts: Vec<&str> = input.split_whitespace().collect();
        let [field, op, value] = parts.as_slice() else {
            return Err(invalid("expected '<field> <op> <value>'"));
        };
        let field = match *field {
            "affected_users.length" => ConditionField::AffectedUserCount,
            "affected_resources.length" => ConditionField::AffectedResourceCount,
            "timeline.length" => ConditionField::TimelineLength,
            _ => return Err(invalid("unknown field")),
        };
        let op = match *op {
            "==" => Comparator::Eq,
            ">" => Comparator::Gt,
            ">=" => Comparator::Ge,
            "<" => Comparator::Lt,
            "<=" => Comparator::Le,
            _ => return Err(invalid("unknown comparator")),
        };
        let value: i64 = value.parse().map_err(|_| invalid("value is not an integer"))?;
        Ok(Self { field, op, value })
    }

    pub fn evaluate(&self, incident: &Incident) -> bool {
        let actual = self.field.project(incident);
        match self.op {
            Comparator::Eq => actual == self.value,
            Comparator::Gt => actual > self.value,
            Comparator::Ge => actual >= self.value,
            Comparator::Lt => actual < self.value,
            Comparator::Le => actual <= self.value,
        }
    }
}

/// One step in a playbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybookStep {
    /// Strict execution sequence within the playbook.
    pub order: u32,
    /// Registered action handler name.
    pub action: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    /// Absent condition means the step always runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,
    pub on_failure: OnFailure,
}

impl PlaybookStep {
    pub fn new(order: u32, action: impl Into<String>, on_failure: OnFailure) -> Self {
        Self {
            order,
            action: action.into(),
            parameters: HashMap::new(),
            condition: None,
            on_failure,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// An ordered remediation procedure for one threat type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    /// Threat type that triggers this playbook.
    pub trigger: ThreatType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub steps: Vec<PlaybookStep>,
}

fn default_true() -> bool {
    true
}

/// Static registry mapping threat types to playbooks. Steps are immutable
/// once registered.
pub struct PlaybookRegistry {
    playbooks: HashMap<ThreatType, Playbook>,
}

impl PlaybookRegistry {
    pub fn new() -> Self {
        Self {
            playbooks: HashMap::new(),
        }
    }

    /// Register a playbook, validating it eagerly: it must have steps and
    /// unique step orders. Replaces any playbook for the same trigger.
    pub fn register(&mut self, playbook: Playbook) -> Result<(), PlaybookError> {
        if playbook.steps.is_empty() {
            return Err(PlaybookError::EmptyPlaybook(playbook.id));
        }
        let mut seen = HashSet::new();
        for step in &playbook.steps {
            if !seen.insert(step.order) {
                return Err(PlaybookError::DuplicateStepOrder {
                    playbook: playbook.id,
                    order: step.order,
                });
            }
        }
        self.playbooks.insert(playbook.trigger, playbook);
        Ok(())
    }

    /// Enabled playbook for a threat type, if any.
    pub fn get(&self, trigger: ThreatType) -> Option<&Playbook> {
        self.playbooks.get(&trigger).filter(|p| p.enabled)
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }

    /// Registry preloaded with the default response procedures.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let defaults = [
            brute_force_playbook(),
            credential_stuffing_playbook(),
            sql_injection_playbook(),
            ddos_playbook(),
            vote_manipulation_playbook(),
            session_hijacking_playbook(),
            data_exfiltration_playbook(),
        ];
        for playbook in defaults {
            // Defaults are static and well-formed.
            registry
                .register(playbook)
                .expect("default playbook is valid");
        }
        registry
    }
}

impl Default for PlaybookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn brute_force_playbook() -> Playbook {
    Playbook {
        id: "brute-force-response".into(),
        name: "Brute Force Response".into(),
        trigger: ThreatType::BruteForce,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "block_ip", OnFailure::Retry)
                .with_param("duration", serde_json::json!(3600)),
            PlaybookStep::new(2, "lock_account", OnFailure::Continue)
                .with_param("duration", serde_json::json!(1800)),
            PlaybookStep::new(3, "revoke_sessions", OnFailure::Continue),
            PlaybookStep::new(4, "notify_user", OnFailure::Continue),
            PlaybookStep::new(5, "escalate", OnFailure::Continue)
                .with_param("priority", serde_json::json!("P1"))
                .when(StepCondition::new(
                    ConditionField::AffectedUserCount,
                    Comparator::Gt,
                    10,
                )),
        ],
    }
}

fn credential_stuffing_playbook() -> Playbook {
    Playbook {
        id: "credential-stuffing-response".into(),
        name: "Credential Stuffing Response".into(),
        trigger: ThreatType::CredentialStuffing,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "block_ip", OnFailure::Retry)
                .with_param("duration", serde_json::json!(86400)),
            PlaybookStep::new(2, "force_password_reset", OnFailure::Continue),
            PlaybookStep::new(3, "revoke_sessions", OnFailure::Continue),
            PlaybookStep::new(4, "enable_captcha", OnFailure::Continue)
                .with_param("duration", serde_json::json!(3600)),
            PlaybookStep::new(5, "notify_security_team", OnFailure::Continue),
        ],
    }
}

fn sql_injection_playbook() -> Playbook {
    Playbook {
        id: "sql-injection-response".into(),
        name: "SQL Injection Response".into(),
        trigger: ThreatType::SqlInjection,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "block_ip", OnFailure::Retry)
                .with_param("duration", serde_json::json!(86400)),
            PlaybookStep::new(2, "collect_forensics", OnFailure::Continue),
            PlaybookStep::new(3, "notify_security_team", OnFailure::Continue),
            PlaybookStep::new(4, "escalate", OnFailure::Continue)
                .with_param("priority", serde_json::json!("P2"))
                .when(StepCondition::new(
                    ConditionField::AffectedResourceCount,
                    Comparator::Gt,
                    1,
                )),
        ],
    }
}

fn ddos_playbook() -> Playbook {
    Playbook {
        id: "ddos-response".into(),
        name: "DDoS Response".into(),
        trigger: ThreatType::Ddos,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "enable_rate_limiting", OnFailure::Abort)
                .with_param("level", serde_json::json!("strict")),
            PlaybookStep::new(2, "block_ip_range", OnFailure::Continue)
                .with_param("duration", serde_json::json!(3600)),
            PlaybookStep::new(3, "notify_ops_team", OnFailure::Continue),
        ],
    }
}

fn vote_manipulation_playbook() -> Playbook {
    Playbook {
        id: "vote-manipulation-response".into(),
        name: "Vote Manipulation Response".into(),
        trigger: ThreatType::VoteManipulation,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "suspend_voting", OnFailure::Abort),
            PlaybookStep::new(2, "flag_votes", OnFailure::Continue),
            PlaybookStep::new(3, "collect_forensics", OnFailure::Continue),
            PlaybookStep::new(4, "notify_security_team", OnFailure::Continue),
            PlaybookStep::new(5, "escalate", OnFailure::Continue)
                .with_param("priority", serde_json::json!("P1")),
        ],
    }
}

fn session_hijacking_playbook() -> Playbook {
    Playbook {
        id: "session-hijacking-response".into(),
        name: "Session Hijacking Response".into(),
        trigger: ThreatType::SessionHijacking,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "revoke_sessions", OnFailure::Retry),
            PlaybookStep::new(2, "require_mfa", OnFailure::Continue),
            PlaybookStep::new(3, "force_password_reset", OnFailure::Continue),
            PlaybookStep::new(4, "notify_user", OnFailure::Continue),
        ],
    }
}

fn data_exfiltration_playbook() -> Playbook {
    Playbook {
        id: "data-exfiltration-response".into(),
        name: "Data Exfiltration Response".into(),
        trigger: ThreatType::DataExfiltration,
        enabled: true,
        steps: vec![
            PlaybookStep::new(1, "lock_account", OnFailure::Abort)
                .with_param("permanent", serde_json::json!(true)),
            PlaybookStep::new(2, "revoke_sessions", OnFailure::Retry),
            PlaybookStep::new(3, "collect_forensics", OnFailure::Continue),
            PlaybookStep::new(4, "notify_security_team", OnFailure::Continue),
            PlaybookStep::new(5, "escalate", OnFailure::Continue)
                .with_param("priority", serde_json::json!("P1")),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentPriority;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_cover_core_threat_types() {
        let registry = PlaybookRegistry::with_defaults();
        assert_eq!(registry.len(), 7);
        assert!(registry.get(ThreatType::BruteForce).is_some());
        assert!(registry.get(ThreatType::VoteManipulation).is_some());
        assert!(registry.get(ThreatType::Xss).is_none());
    }

    #[test]
    fn disabled_playbook_not_returned() {
        let mut registry = PlaybookRegistry::new();
        let mut playbook = ddos_playbook();
        playbook.enabled = false;
        registry.register(playbook).unwrap();
        assert!(registry.get(ThreatType::Ddos).is_none());
    }

    #[test]
    fn register_rejects_duplicate_orders() {
        let mut registry = PlaybookRegistry::new();
        let mut playbook = ddos_playbook();
        playbook.steps[1].order = 1;
        let err = registry.register(playbook).unwrap_err();
        assert!(matches!(err, PlaybookError::DuplicateStepOrder { order: 1, .. }));
    }

    #[test]
    fn register_rejects_empty_playbook() {
        let mut registry = PlaybookRegistry::new();
        let mut playbook = ddos_playbook();
        playbook.steps.clear();
        assert!(matches!(
            registry.register(playbook),
            Err(PlaybookError::EmptyPlaybook(_))
        ));
    }

    #[test]
    fn condition_parse_round_trip() {
        let condition = StepCondition::parse("affected_users.length > 10").unwrap();
        assert_eq!(
            condition,
            StepCondition::new(ConditionField::AffectedUserCount, Comparator::Gt, 10)
        );

        let condition = StepCondition::parse("timeline.length <= 3").unwrap();
        assert_eq!(condition.field, ConditionField::TimelineLength);
    }

    #[test]
    fn condition_parse_rejects_malformed() {
        for bad in [
            "",
            "affected_users.length >",
            "affected_users.length ~ 10",
            "nonsense.field > 10",
            "affected_users.length > ten",
        ] {
            assert!(
                matches!(
                    StepCondition::parse(bad),
                    Err(PlaybookError::InvalidCondition { .. })
                ),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn condition_evaluates_incident_projections() {
        let incident = Incident::new(ThreatType::BruteForce, IncidentPriority::P2)
            .with_user("a")
            .with_user("b")
            .with_resource("10.0.0.1");

        assert!(
            StepCondition::new(ConditionField::AffectedUserCount, Comparator::Ge, 2)
                .evaluate(&incident)
        );
        assert!(
            !StepCondition::new(ConditionField::AffectedUserCount, Comparator::Gt, 2)
                .evaluate(&incident)
        );
        assert!(
            StepCondition::new(ConditionField::AffectedResourceCount, Comparator::Eq, 1)
                .evaluate(&incident)
        );
    }
}
