//! Remediation engine — runs the playbook matching an incident's threat
//! type, step by step, and records the outcome.
//!
//! Steps run strictly sequentially in `order`. A failing step is handled
//! per its `on_failure` policy; an unresolvable handler name aborts the run
//! rather than silently skipping. A run with at least one performed action
//! and no abort moves the incident to `Contained`.

use crate::config::RemediationConfig;
use crate::error::RemediationError;
use crate::incident::{Incident, IncidentLedger, IncidentStatus, TimelineEntry};
use crate::response::actions::ActionHandler;
use crate::response::playbook::{OnFailure, Playbook, PlaybookRegistry, PlaybookStep};
use crate::store::Store;
use crate::threat::Threat;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one playbook run against an incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationResult {
    pub incident_id: String,
    /// False when any step aborted the run or exhausted its retries.
    pub success: bool,
    /// Actions that completed, in execution order, with their detail.
    pub actions_performed: Vec<String>,
    /// One entry per failed step attempt outcome.
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RemediationResult {
    fn new(incident_id: &str) -> Self {
        Self {
            incident_id: incident_id.to_string(),
            success: true,
            actions_performed: Vec::new(),
            errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Executes playbooks against incidents.
pub struct RemediationEngine<S: Store> {
    store: Arc<S>,
    ledger: Arc<dyn IncidentLedger>,
    registry: PlaybookRegistry,
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    config: RemediationConfig,
}

impl<S: Store + 'static> RemediationEngine<S> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<dyn IncidentLedger>,
        registry: PlaybookRegistry,
        handlers: HashMap<String, Arc<dyn ActionHandler>>,
        config: RemediationConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            registry,
            handlers,
            config,
        }
    }

    /// Open an incident for a threat and run the matching playbook,
    /// appending the performed actions to the threat's mitigation record.
    pub async fn respond_to_threat(
        &self,
        threat: &mut Threat,
    ) -> Result<RemediationResult, RemediationError> {
        let incident = Incident::from_threat(threat);
        let incident_id = incident.id.clone();
        self.ledger.open(incident).await?;
        let result = self.remediate(&incident_id).await?;
        threat
            .mitigation_actions
            .extend(result.actions_performed.iter().cloned());
        Ok(result)
    }

    /// Run the playbook for an incident's threat type. An incident with no
    /// matching enabled playbook yields a successful empty result.
    pub async fn remediate(&self, incident_id: &str) -> Result<RemediationResult, RemediationError> {
        let incident = self.ledger.get(incident_id).await?;
        let mut result = RemediationResult::new(incident_id);

        let Some(playbook) = self.registry.get(incident.threat_type) else {
            tracing::debug!(
                incident = %incident_id,
                threat_type = %incident.threat_type,
                "no playbook registered, nothing to do"
            );
            return Ok(result);
        };

        self.ledger
            .add_timeline_entry(
                incident_id,
                TimelineEntry::new(
                    "remediation_started",
                    "remediation",
                    format!("playbook '{}'", playbook.id),
                ),
            )
            .await?;

        let mut steps: Vec<&PlaybookStep> = playbook.steps.iter().collect();
        steps.sort_by_key(|s| s.order);

        for step in steps {
            // Later steps' conditions may depend on earlier steps' side
            // effects, so every step sees the live incident, not the
            // snapshot taken at lookup time.
            let incident = self.ledger.get(incident_id).await?;
            if let Some(condition) = &step.condition {
                if !condition.evaluate(&incident) {
                    tracing::debug!(
                        incident = %incident_id,
                        action = %step.action,
                        "step condition not met, skipping"
                    );
                    self.ledger
                        .add_timeline_entry(
                            incident_id,
                            TimelineEntry::new(
                                "step_skipped",
                                "remediation",
                                format!("{}: condition not met", step.action),
                            ),
                        )
                        .await?;
                    continue;
                }
            }

            let Some(handler) = self.handlers.get(&step.action) else {
                // A playbook naming an unregistered action is a
                // configuration error. Abort instead of skipping so the
                // gap cannot go unnoticed.
                let err = RemediationError::UnknownAction(step.action.clone());
                tracing::error!(incident = %incident_id, action = %step.action, "{err}");
                result.errors.push(err.to_string());
                result.success = false;
                break;
            };

            if !self.run_step(&incident, playbook, step, handler.as_ref(), &mut result).await? {
                break;
            }
        }

        self.ledger
            .add_timeline_entry(
                incident_id,
                TimelineEntry::new(
                    "remediation_finished",
                    "remediation",
                    format!(
                        "success={} actions={} errors={}",
                        result.success,
                        result.actions_performed.len(),
                        result.errors.len()
                    ),
                ),
            )
            .await?;

        if result.success && !result.actions_performed.is_empty() {
            self.mark_contained(incident_id).await?;
        }

        self.record_result(&result).await?;
        Ok(result)
    }

    /// Execute one step under its failure policy. Returns false when the
    /// run should stop.
    async fn run_step(
        &self,
        incident: &Incident,
        playbook: &Playbook,
        step: &PlaybookStep,
        handler: &dyn ActionHandler,
        result: &mut RemediationResult,
    ) -> Result<bool, RemediationError> {
        let max_attempts = match step.on_failure {
            OnFailure::Retry => self.config.retry_max_attempts.max(1),
            _ => 1,
        };

        for attempt in 1..=max_attempts {
            match handler.execute(incident, &step.parameters).await {
                Ok(outcome) => {
                    tracing::info!(
                        incident = %incident.id,
                        playbook = %playbook.id,
                        action = %step.action,
                        attempt,
                        "action completed"
                    );
                    result
                        .actions_performed
                        .push(format!("{}: {}", step.action, outcome.detail));
                    return Ok(true);
                }
                Err(err) => {
                    tracing::warn!(
                        incident = %incident.id,
                        action = %step.action,
                        attempt,
                        "action failed: {err}"
                    );
                    result
                        .errors
                        .push(format!("{} (attempt {attempt}): {err}", step.action));
                    if attempt < max_attempts {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms))
                            .await;
                    }
                }
            }
        }

        match step.on_failure {
            OnFailure::Continue => Ok(true),
            OnFailure::Abort | OnFailure::Retry => {
                result.success = false;
                Ok(false)
            }
        }
    }

    /// Containment is only claimed once at least one action succeeded;
    /// re-running against an already contained incident is a no-op.
    async fn mark_contained(&self, incident_id: &str) -> Result<(), RemediationError> {
        let current = self.ledger.get(incident_id).await?;
        if current.status.can_transition_to(IncidentStatus::Contained) {
            self.ledger
                .update_status(
                    incident_id,
                    IncidentStatus::Contained,
                    "remediation",
                    "playbook completed",
                )
                .await?;
        }
        Ok(())
    }

    async fn record_result(&self, result: &RemediationResult) -> Result<(), RemediationError> {
        let key = format!("rampart:remediation:{}", result.incident_id);
        let payload = serde_json::to_string(result).map_err(crate::error::StoreError::from)?;
        self.store.rpush(&key, &payload).await?;
        self.store
            .ltrim(&key, -(self.config.history_limit as i64), -1)
            .await?;
        Ok(())
    }

    /// Past run results for an incident, oldest first.
    pub async fn history(
        &self,
        incident_id: &str,
    ) -> Result<Vec<RemediationResult>, RemediationError> {
        let key = format!("rampart:remediation:{incident_id}");
        let raw = self.store.lrange(&key, 0, -1).await?;
        let mut out = Vec::with_capacity(raw.len());
        for item in raw {
            out.push(
                serde_json::from_str(&item).map_err(crate::error::StoreError::from)?,
            );
        }
        Ok(out)
    }
}
