//! Escalation rule engine — ordered predicate rules mapping contextual
//! signals to an escalation level.
//!
//! Rules are data, not code: new rules can be registered at runtime without
//! touching the evaluator. Evaluation is strictly first-match-wins over the
//! ordered list; an unmatched context yields no escalation, which is not an
//! error.

use crate::error::StoreError;
use crate::store::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Response level an escalation rule assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationLevel {
    Monitor,
    Review,
    Urgent,
    Critical,
}

impl std::fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscalationLevel::Monitor => write!(f, "monitor"),
            EscalationLevel::Review => write!(f, "review"),
            EscalationLevel::Urgent => write!(f, "urgent"),
            EscalationLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Context a rule predicate evaluates against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscalationContext {
    pub report_count: u64,
    pub reason: String,
    pub auto_flags: Vec<String>,
    pub content_type: String,
    /// Reputation of the reporting account in [0, 1], when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_reputation: Option<f64>,
    /// Prior moderation actions against the same entity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_actions: Vec<String>,
}

/// One ordered rule: a predicate over the context, and the level and reason
/// assigned on match.
pub struct EscalationRule {
    pub id: String,
    pub level: EscalationLevel,
    pub reason: String,
    predicate: Box<dyn Fn(&EscalationContext) -> bool + Send + Sync>,
}

impl EscalationRule {
    pub fn new(
        id: impl Into<String>,
        level: EscalationLevel,
        reason: impl Into<String>,
        predicate: impl Fn(&EscalationContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            level,
            reason: reason.into(),
            predicate: Box::new(predicate),
        }
    }

    pub fn matches(&self, context: &EscalationContext) -> bool {
        (self.predicate)(context)
    }
}

/// Escalation record lifecycle — independent of the originating threat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    Pending,
    Acknowledged,
    Resolved,
}

/// A logged escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub id: String,
    pub rule_id: String,
    pub level: EscalationLevel,
    pub reason: String,
    pub context: EscalationContext,
    pub status: EscalationStatus,
    pub created_at: DateTime<Utc>,
}

const ESCALATION_INDEX: &str = "rampart:escalations";

fn escalation_key(id: &str) -> String {
    format!("rampart:escalation:{id}")
}

/// Ordered rule evaluator with store-logged escalation records.
pub struct EscalationEngine<S: Store> {
    store: Arc<S>,
    rules: Vec<EscalationRule>,
}

impl<S: Store> EscalationEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            rules: Vec::new(),
        }
    }

    /// Create with the default rule set.
    pub fn with_defaults(store: Arc<S>) -> Self {
        let mut engine = Self::new(store);
        engine.add_rule(EscalationRule::new(
            "prohibited-content-flag",
            EscalationLevel::Critical,
            "automated flag for prohibited content",
            |ctx| {
                ctx.auto_flags
                    .iter()
                    .any(|f| f == "prohibited" || f == "violence")
            },
        ));
        engine.add_rule(EscalationRule::new(
            "mass-reports",
            EscalationLevel::Critical,
            "mass reporting volume",
            |ctx| ctx.report_count >= 10,
        ));
        engine.add_rule(EscalationRule::new(
            "flagged-vote-content",
            EscalationLevel::Urgent,
            "automated flags on voting content",
            |ctx| ctx.content_type == "vote" && !ctx.auto_flags.is_empty(),
        ));
        engine.add_rule(EscalationRule::new(
            "trusted-reporter",
            EscalationLevel::Urgent,
            "repeated reports from a high-reputation reporter",
            |ctx| ctx.reporter_reputation.unwrap_or(0.0) > 0.8 && ctx.report_count >= 3,
        ));
        engine.add_rule(EscalationRule::new(
            "repeat-offender",
            EscalationLevel::Review,
            "prior moderation actions on the same entity",
            |ctx| !ctx.previous_actions.is_empty() && ctx.report_count >= 2,
        ));
        engine.add_rule(EscalationRule::new(
            "report-volume",
            EscalationLevel::Review,
            "report volume above review threshold",
            |ctx| ctx.report_count >= 5,
        ));
        engine
    }

    /// Append a rule to the end of the evaluation order.
    pub fn add_rule(&mut self, rule: EscalationRule) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, EscalationLevel)> {
        self.rules.iter().map(|r| (r.id.as_str(), r.level))
    }

    /// Evaluate the ordered rules; the first match produces a pending
    /// escalation record, logged to the store. No match is `Ok(None)`.
    pub async fn evaluate(
        &self,
        context: &EscalationContext,
    ) -> Result<Option<Escalation>, StoreError> {
        let Some(rule) = self.rules.iter().find(|r| r.matches(context)) else {
            return Ok(None);
        };

        let escalation = Escalation {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            level: rule.level,
            reason: rule.reason.clone(),
            context: context.clone(),
            status: EscalationStatus::Pending,
            created_at: Utc::now(),
        };
        self.save(&escalation).await?;
        self.store.rpush(ESCALATION_INDEX, &escalation.id).await?;
        tracing::info!(rule = %rule.id, level = %rule.level, "escalation created");
        Ok(Some(escalation))
    }

    pub async fn get(&self, id: &str) -> Result<Option<Escalation>, StoreError> {
        match self.store.get(&escalation_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Acknowledge a pending escalation. Returns false if unknown.
    pub async fn acknowledge(&self, id: &str) -> Result<bool, StoreError> {
        self.transition(id, EscalationStatus::Acknowledged).await
    }

    /// Resolve an escalation. Returns false if unknown.
    pub async fn resolve(&self, id: &str) -> Result<bool, StoreError> {
        self.transition(id, EscalationStatus::Resolved).await
    }

    async fn transition(&self, id: &str, status: EscalationStatus) -> Result<bool, StoreError> {
        let Some(mut escalation) = self.get(id).await? else {
            return Ok(false);
        };
        escalation.status = status;
        self.save(&escalation).await?;
        Ok(true)
    }

    async fn save(&self, escalation: &Escalation) -> Result<(), StoreError> {
        let payload = serde_json::to_string(escalation)?;
        self.store
            .set(&escalation_key(&escalation.id), &payload)
            .await
    }
}
