//! Incident model and ledger — the investigation/response unit aggregating
//! threats against shared affected users and resources.
//!
//! The engine never owns incident persistence; it reads and writes through
//! the narrow [`IncidentLedger`] interface. [`MemoryLedger`] is the
//! reference implementation.

use crate::error::IncidentError;
use crate::threat::{Threat, ThreatLevel, ThreatType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Incident priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IncidentPriority {
    P4,
    P3,
    P2,
    P1,
}

impl std::fmt::Display for IncidentPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentPriority::P1 => write!(f, "P1"),
            IncidentPriority::P2 => write!(f, "P2"),
            IncidentPriority::P3 => write!(f, "P3"),
            IncidentPriority::P4 => write!(f, "P4"),
        }
    }
}

impl From<ThreatLevel> for IncidentPriority {
    fn from(level: ThreatLevel) -> Self {
        match level {
            ThreatLevel::Critical => IncidentPriority::P1,
            ThreatLevel::High => IncidentPriority::P2,
            ThreatLevel::Medium => IncidentPriority::P3,
            ThreatLevel::Low => IncidentPriority::P4,
        }
    }
}

/// Incident lifecycle status.
///
/// `Detected -> Investigating -> Contained -> Resolved`, with
/// `Investigating` reachable directly from `Detected` via escalation, and
/// `Resolved` reachable from `Investigating` when investigation finds
/// nothing to contain. `Contained` is set only by the remediation engine
/// after at least one successful action. No backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detected,
    Investigating,
    Contained,
    Resolved,
}

impl IncidentStatus {
    /// Whether a transition from `self` to `to` is allowed.
    pub fn can_transition_to(self, to: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, to),
            (Detected, Investigating)
                | (Detected, Contained)
                | (Investigating, Contained)
                | (Contained, Resolved)
                | (Investigating, Resolved)
        )
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Detected => write!(f, "detected"),
            IncidentStatus::Investigating => write!(f, "investigating"),
            IncidentStatus::Contained => write!(f, "contained"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// An entry in the incident timeline. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub action: String,
    pub actor: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl TimelineEntry {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            details: details.into(),
            timestamp: Utc::now(),
        }
    }
}

fn is_ip_shaped(value: &str) -> bool {
    value.parse::<std::net::IpAddr>().is_ok()
}

/// An ongoing security event under investigation/response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub threat_type: ThreatType,
    pub priority: IncidentPriority,
    pub affected_users: BTreeSet<String>,
    /// IPs, IP ranges, content ids.
    pub affected_resources: BTreeSet<String>,
    pub status: IncidentStatus,
    pub timeline: Vec<TimelineEntry>,
    pub opened_at: DateTime<Utc>,
}

impl Incident {
    pub fn new(threat_type: ThreatType, priority: IncidentPriority) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            threat_type,
            priority,
            affected_users: BTreeSet::new(),
            affected_resources: BTreeSet::new(),
            status: IncidentStatus::Detected,
            timeline: Vec::new(),
            opened_at: Utc::now(),
        }
    }

    /// Open an incident for a threat that crossed the incident-worthy
    /// threshold.
    ///
    /// Endpoints are routed by shape and threat type: IP-shaped values are
    /// always resources, a non-IP target of an account-directed threat is a
    /// user, and everything else (injection field paths, content ids) is a
    /// resource. Empty endpoints are skipped.
    pub fn from_threat(threat: &Threat) -> Self {
        let mut incident = Self::new(threat.threat_type, threat.level.into());
        if !threat.target.is_empty() {
            if !is_ip_shaped(&threat.target) && threat.threat_type.targets_accounts() {
                incident.affected_users.insert(threat.target.clone());
            } else {
                incident.affected_resources.insert(threat.target.clone());
            }
        }
        if !threat.source.is_empty() {
            incident.affected_resources.insert(threat.source.clone());
        }
        incident.timeline.push(TimelineEntry::new(
            "incident_opened",
            "detector",
            format!(
                "{} threat {} (level {})",
                threat.threat_type, threat.id, threat.level
            ),
        ));
        incident
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.affected_users.insert(user.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.affected_resources.insert(resource.into());
        self
    }
}

/// Narrow interface to the incident ledger collaborator.
#[async_trait]
pub trait IncidentLedger: Send + Sync {
    /// Register a new incident.
    async fn open(&self, incident: Incident) -> Result<(), IncidentError>;

    async fn get(&self, incident_id: &str) -> Result<Incident, IncidentError>;

    /// Advance the incident status, validating the state machine, and
    /// append a timeline entry recording the change.
    async fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        actor: &str,
        note: &str,
    ) -> Result<(), IncidentError>;

    async fn add_timeline_entry(
        &self,
        incident_id: &str,
        entry: TimelineEntry,
    ) -> Result<(), IncidentError>;
}

/// In-process ledger used in tests and single-node deployments.
#[derive(Default)]
pub struct MemoryLedger {
    incidents: RwLock<HashMap<String, Incident>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentLedger for MemoryLedger {
    async fn open(&self, incident: Incident) -> Result<(), IncidentError> {
        let mut incidents = self.incidents.write().await;
        incidents.insert(incident.id.clone(), incident);
        Ok(())
    }

    async fn get(&self, incident_id: &str) -> Result<Incident, IncidentError> {
        let incidents = self.incidents.read().await;
        incidents
            .get(incident_id)
            .cloned()
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))
    }

    async fn update_status(
        &self,
        incident_id: &str,
        status: IncidentStatus,
        actor: &str,
        note: &str,
    ) -> Result<(), IncidentError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))?;
        if !incident.status.can_transition_to(status) {
            return Err(IncidentError::InvalidTransition {
                from: incident.status.to_string(),
                to: status.to_string(),
            });
        }
        let from = incident.status;
        incident.status = status;
        incident.timeline.push(TimelineEntry::new(
            "status_changed",
            actor,
            format!("{from} -> {status}: {note}"),
        ));
        Ok(())
    }

    async fn add_timeline_entry(
        &self,
        incident_id: &str,
        entry: TimelineEntry,
    ) -> Result<(), IncidentError> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(incident_id)
            .ok_or_else(|| IncidentError::NotFound(incident_id.to_string()))?;
        incident.timeline.push(entry);
        Ok(())
    }
}
