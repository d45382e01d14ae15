//! Quarantine service — isolates a user, IP, session, or resource behind a
//! restriction policy with optional expiry.
//!
//! Checks are fail-open by policy: the absence of an entry means "allowed".
//! This is a deliberate, documented choice — the check sits on hot request
//! paths — and store errors are still surfaced so callers can decide for
//! themselves. See DESIGN.md.
//!
//! The backing store expires a timed entry's data key on its own, but not
//! the index-set membership that makes entries enumerable. The
//! [`QuarantineService::cleanup_expired`] sweep reconciles the two and must
//! be scheduled at `QuarantineConfig::cleanup_interval_secs`.

use crate::config::QuarantineConfig;
use crate::error::QuarantineError;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// What kind of entity an entry isolates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineType {
    User,
    Ip,
    Session,
    Resource,
}

impl QuarantineType {
    pub const ALL: [QuarantineType; 4] = [
        QuarantineType::User,
        QuarantineType::Ip,
        QuarantineType::Session,
        QuarantineType::Resource,
    ];
}

impl std::fmt::Display for QuarantineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuarantineType::User => write!(f, "user"),
            QuarantineType::Ip => write!(f, "ip"),
            QuarantineType::Session => write!(f, "session"),
            QuarantineType::Resource => write!(f, "resource"),
        }
    }
}

/// Severity tier selecting the default restriction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// One restriction in an entry's policy. A restriction with action `*`
/// dominates every specific-action check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restriction {
    pub action: String,
    pub blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Restriction {
    pub fn block(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            blocked: true,
            message: Some(message.into()),
        }
    }
}

/// An active quarantine record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub id: String,
    pub entry_type: QuarantineType,
    pub target: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub quarantined_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Ordered; first matching blocked restriction short-circuits.
    pub restrictions: Vec<Restriction>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// Options for creating a quarantine entry.
#[derive(Debug, Clone, Default)]
pub struct QuarantineOptions {
    pub severity: Option<QuarantineSeverity>,
    pub duration_secs: Option<u64>,
    pub incident_id: Option<String>,
    /// Supplied restrictions override the severity-tier defaults.
    pub restrictions: Option<Vec<Restriction>>,
    pub metadata: HashMap<String, String>,
}

impl QuarantineOptions {
    pub fn severity(severity: QuarantineSeverity) -> Self {
        Self {
            severity: Some(severity),
            ..Default::default()
        }
    }

    pub fn for_incident(mut self, incident_id: impl Into<String>) -> Self {
        self.incident_id = Some(incident_id.into());
        self
    }

    pub fn with_duration(mut self, duration_secs: u64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }
}

/// Result of an action-permission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCheck {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            message: None,
        }
    }

    fn denied(message: Option<String>) -> Self {
        Self {
            allowed: false,
            message,
        }
    }
}

const AUDIT_KEY: &str = "rampart:quarantine:audit";
const AUDIT_LIMIT: i64 = 10_000;

fn entry_key(entry_type: QuarantineType, target: &str) -> String {
    format!("rampart:quarantine:{entry_type}:{target}")
}

fn index_key(entry_type: QuarantineType) -> String {
    format!("rampart:quarantine:index:{entry_type}")
}

/// Default restriction set for a severity tier.
fn default_restrictions(severity: QuarantineSeverity) -> Vec<Restriction> {
    if severity == QuarantineSeverity::Critical {
        return vec![Restriction::block("*", "entity is quarantined")];
    }
    let mut restrictions = vec![Restriction::block(
        "admin_access",
        "administrative access suspended",
    )];
    if severity >= QuarantineSeverity::Medium {
        restrictions.push(Restriction::block(
            "sensitive_data",
            "sensitive data access suspended",
        ));
        restrictions.push(Restriction::block(
            "bulk_operations",
            "bulk operations suspended",
        ));
    }
    if severity >= QuarantineSeverity::High {
        restrictions.push(Restriction::block("voting", "voting suspended"));
        restrictions.push(Restriction::block("delegation", "delegation suspended"));
    }
    restrictions
}

/// Store-backed quarantine service.
pub struct QuarantineService<S: Store> {
    store: Arc<S>,
    config: QuarantineConfig,
}

impl<S: Store> QuarantineService<S> {
    pub fn new(store: Arc<S>, config: QuarantineConfig) -> Self {
        Self { store, config }
    }

    pub async fn quarantine_user(
        &self,
        target: &str,
        reason: &str,
        opts: QuarantineOptions,
    ) -> Result<QuarantineEntry, QuarantineError> {
        self.quarantine(QuarantineType::User, target, reason, opts)
            .await
    }

    pub async fn quarantine_ip(
        &self,
        target: &str,
        reason: &str,
        opts: QuarantineOptions,
    ) -> Result<QuarantineEntry, QuarantineError> {
        self.quarantine(QuarantineType::Ip, target, reason, opts)
            .await
    }

    pub async fn quarantine_session(
        &self,
        target: &str,
        reason: &str,
        opts: QuarantineOptions,
    ) -> Result<QuarantineEntry, QuarantineError> {
        self.quarantine(QuarantineType::Session, target, reason, opts)
            .await
    }

    pub async fn quarantine_resource(
        &self,
        target: &str,
        reason: &str,
        opts: QuarantineOptions,
    ) -> Result<QuarantineEntry, QuarantineError> {
        self.quarantine(QuarantineType::Resource, target, reason, opts)
            .await
    }

    /// Create (or replace) the active entry for `(entry_type, target)`.
    ///
    /// At most one active entry governs a pair at any instant; a new
    /// quarantine overwrites the previous one.
    pub async fn quarantine(
        &self,
        entry_type: QuarantineType,
        target: &str,
        reason: &str,
        opts: QuarantineOptions,
    ) -> Result<QuarantineEntry, QuarantineError> {
        let severity = opts.severity.unwrap_or(QuarantineSeverity::Medium);
        let duration_secs = opts.duration_secs.or(self.config.default_duration_secs);
        let restrictions = opts
            .restrictions
            .unwrap_or_else(|| default_restrictions(severity));

        let entry = QuarantineEntry {
            id: Uuid::new_v4().to_string(),
            entry_type,
            target: target.to_string(),
            reason: reason.to_string(),
            incident_id: opts.incident_id,
            quarantined_at: Utc::now(),
            expires_at: duration_secs.map(|d| Utc::now() + Duration::seconds(d as i64)),
            restrictions,
            metadata: opts.metadata,
        };

        let key = entry_key(entry_type, target);
        let payload = serde_json::to_string(&entry).map_err(crate::error::StoreError::from)?;
        match duration_secs {
            Some(ttl) => self.store.set_ex(&key, &payload, ttl).await?,
            None => self.store.set(&key, &payload).await?,
        }
        self.store.sadd(&index_key(entry_type), target).await?;
        self.append_audit("quarantined", entry_type, target, "rampart", reason)
            .await?;
        tracing::info!(%entry_type, target, reason, "entity quarantined");
        Ok(entry)
    }

    /// Fetch the active entry for a pair, if any.
    pub async fn get_entry(
        &self,
        entry_type: QuarantineType,
        target: &str,
    ) -> Result<Option<QuarantineEntry>, QuarantineError> {
        let key = entry_key(entry_type, target);
        match self.store.get(&key).await? {
            Some(raw) => {
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| QuarantineError::MalformedEntry {
                        key,
                        message: e.to_string(),
                    })
            }
            None => Ok(None),
        }
    }

    pub async fn is_quarantined(
        &self,
        entry_type: QuarantineType,
        target: &str,
    ) -> Result<bool, QuarantineError> {
        Ok(self
            .store
            .exists(&entry_key(entry_type, target))
            .await?)
    }

    /// Check whether `action` is allowed for the entity. Fail-open: no
    /// entry means allowed. A wildcard restriction dominates; otherwise the
    /// first matching blocked restriction denies.
    pub async fn is_action_allowed(
        &self,
        entry_type: QuarantineType,
        target: &str,
        action: &str,
    ) -> Result<ActionCheck, QuarantineError> {
        let Some(entry) = self.get_entry(entry_type, target).await? else {
            return Ok(ActionCheck::allowed());
        };

        if let Some(wildcard) = entry
            .restrictions
            .iter()
            .find(|r| r.action == "*" && r.blocked)
        {
            return Ok(ActionCheck::denied(wildcard.message.clone()));
        }
        for restriction in &entry.restrictions {
            if restriction.action == action && restriction.blocked {
                return Ok(ActionCheck::denied(restriction.message.clone()));
            }
        }
        Ok(ActionCheck::allowed())
    }

    /// Active entries of one type. Index members whose backing key has
    /// expired are skipped (and left for [`Self::cleanup_expired`]).
    pub async fn get_quarantined_entities(
        &self,
        entry_type: QuarantineType,
    ) -> Result<Vec<QuarantineEntry>, QuarantineError> {
        let members = self.store.smembers(&index_key(entry_type)).await?;
        let mut entries = Vec::new();
        for target in members {
            if let Some(entry) = self.get_entry(entry_type, &target).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Remove the active entry and its index membership, appending an
    /// audit line. Returns whether an entry actually existed.
    pub async fn release(
        &self,
        entry_type: QuarantineType,
        target: &str,
        reason: &str,
        actor: &str,
    ) -> Result<bool, QuarantineError> {
        let existed = self.store.del(&entry_key(entry_type, target)).await?;
        self.store.srem(&index_key(entry_type), target).await?;
        self.append_audit("released", entry_type, target, actor, reason)
            .await?;
        tracing::info!(%entry_type, target, actor, existed, "quarantine released");
        Ok(existed)
    }

    /// Reconcile index sets against natural key expiry: prune any index
    /// member whose backing key no longer exists. Idempotent; returns the
    /// number of members pruned.
    pub async fn cleanup_expired(&self) -> Result<u64, QuarantineError> {
        let mut pruned = 0;
        for entry_type in QuarantineType::ALL {
            let index = index_key(entry_type);
            for target in self.store.smembers(&index).await? {
                if !self.store.exists(&entry_key(entry_type, &target)).await? {
                    self.store.srem(&index, &target).await?;
                    self.append_audit("expired", entry_type, &target, "sweeper", "ttl elapsed")
                        .await?;
                    pruned += 1;
                }
            }
        }
        if pruned > 0 {
            tracing::info!(pruned, "quarantine index sweep pruned expired members");
        }
        Ok(pruned)
    }

    async fn append_audit(
        &self,
        event: &str,
        entry_type: QuarantineType,
        target: &str,
        actor: &str,
        reason: &str,
    ) -> Result<(), QuarantineError> {
        let line = serde_json::json!({
            "event": event,
            "type": entry_type.to_string(),
            "target": target,
            "actor": actor,
            "reason": reason,
            "timestamp": Utc::now(),
        });
        self.store.rpush(AUDIT_KEY, &line.to_string()).await?;
        self.store.ltrim(AUDIT_KEY, -AUDIT_LIMIT, -1).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn service() -> QuarantineService<MemoryStore> {
        QuarantineService::new(Arc::new(MemoryStore::new()), QuarantineConfig::default())
    }

    #[tokio::test]
    async fn critical_severity_blocks_everything() {
        let service = service();
        service
            .quarantine_user(
                "user-1",
                "compromised",
                QuarantineOptions::severity(QuarantineSeverity::Critical),
            )
            .await
            .unwrap();

        let check = service
            .is_action_allowed(QuarantineType::User, "user-1", "anything")
            .await
            .unwrap();
        assert!(!check.allowed);
        assert!(check.message.is_some());
    }

    #[tokio::test]
    async fn release_restores_access() {
        let service = service();
        service
            .quarantine_user(
                "user-1",
                "compromised",
                QuarantineOptions::severity(QuarantineSeverity::Critical),
            )
            .await
            .unwrap();

        let existed = service
            .release(QuarantineType::User, "user-1", "cleared", "analyst")
            .await
            .unwrap();
        assert!(existed);

        let check = service
            .is_action_allowed(QuarantineType::User, "user-1", "anything")
            .await
            .unwrap();
        assert!(check.allowed);

        // Releasing again reports that nothing existed.
        let existed = service
            .release(QuarantineType::User, "user-1", "cleared", "analyst")
            .await
            .unwrap();
        assert!(!existed);
    }

    #[tokio::test]
    async fn no_duration_quarantine_is_permanent() {
        let store = Arc::new(MemoryStore::new());
        let service = QuarantineService::new(store.clone(), QuarantineConfig::default());
        service
            .quarantine_user(
                "user-1",
                "compromised",
                QuarantineOptions::severity(QuarantineSeverity::Critical),
            )
            .await
            .unwrap();

        // No duration asked for, so the entry never lapses on its own.
        assert_eq!(
            store.ttl("rampart:quarantine:user:user-1").await.unwrap(),
            None
        );
        let entry = service
            .get_entry(QuarantineType::User, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.expires_at, None);
    }

    #[tokio::test]
    async fn configured_default_duration_still_applies() {
        let store = Arc::new(MemoryStore::new());
        let config = QuarantineConfig {
            default_duration_secs: Some(600),
            ..QuarantineConfig::default()
        };
        let service = QuarantineService::new(store.clone(), config);
        service
            .quarantine_user("user-2", "spam", QuarantineOptions::default())
            .await
            .unwrap();

        assert!(
            store
                .ttl("rampart:quarantine:user:user-2")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn unknown_entity_fails_open() {
        let service = service();
        let check = service
            .is_action_allowed(QuarantineType::Ip, "198.51.100.1", "login")
            .await
            .unwrap();
        assert!(check.allowed);
    }

    #[tokio::test]
    async fn severity_tiers_scope_restrictions() {
        let service = service();
        service
            .quarantine_user(
                "u-low",
                "r",
                QuarantineOptions::severity(QuarantineSeverity::Low),
            )
            .await
            .unwrap();
        service
            .quarantine_user(
                "u-high",
                "r",
                QuarantineOptions::severity(QuarantineSeverity::High),
            )
            .await
            .unwrap();

        // Low blocks admin access only.
        let low_admin = service
            .is_action_allowed(QuarantineType::User, "u-low", "admin_access")
            .await
            .unwrap();
        assert!(!low_admin.allowed);
        let low_vote = service
            .is_action_allowed(QuarantineType::User, "u-low", "voting")
            .await
            .unwrap();
        assert!(low_vote.allowed);

        // High additionally blocks voting and delegation.
        let high_vote = service
            .is_action_allowed(QuarantineType::User, "u-high", "voting")
            .await
            .unwrap();
        assert!(!high_vote.allowed);
        let high_other = service
            .is_action_allowed(QuarantineType::User, "u-high", "comment")
            .await
            .unwrap();
        assert!(high_other.allowed);
    }

    #[tokio::test]
    async fn explicit_restrictions_override_defaults() {
        let service = service();
        let opts = QuarantineOptions {
            severity: Some(QuarantineSeverity::Critical),
            restrictions: Some(vec![Restriction::block("posting", "no posting")]),
            ..Default::default()
        };
        service
            .quarantine_user("user-2", "spam", opts)
            .await
            .unwrap();

        let posting = service
            .is_action_allowed(QuarantineType::User, "user-2", "posting")
            .await
            .unwrap();
        assert!(!posting.allowed);
        // No wildcard because the explicit set replaced the critical default.
        let other = service
            .is_action_allowed(QuarantineType::User, "user-2", "reading")
            .await
            .unwrap();
        assert!(other.allowed);
    }

    #[tokio::test]
    async fn cleanup_prunes_expired_index_members() {
        let service = service();
        service
            .quarantine_ip(
                "203.0.113.5",
                "scanning",
                QuarantineOptions::severity(QuarantineSeverity::High).with_duration(0),
            )
            .await
            .unwrap();
        // Entry key expired immediately; index membership survives.
        assert!(
            !service
                .is_quarantined(QuarantineType::Ip, "203.0.113.5")
                .await
                .unwrap()
        );

        let pruned = service.cleanup_expired().await.unwrap();
        assert_eq!(pruned, 1);

        // Idempotent: nothing left to prune.
        let pruned = service.cleanup_expired().await.unwrap();
        assert_eq!(pruned, 0);
    }

    #[tokio::test]
    async fn enumeration_skips_expired_entries() {
        let service = service();
        service
            .quarantine_session("live", "r", QuarantineOptions::default())
            .await
            .unwrap();
        service
            .quarantine_session(
                "dead",
                "r",
                QuarantineOptions::default().with_duration(0),
            )
            .await
            .unwrap();

        let entries = service
            .get_quarantined_entities(QuarantineType::Session)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, "live");
    }

    #[tokio::test]
    async fn new_entry_replaces_previous() {
        let service = service();
        service
            .quarantine_user(
                "user-3",
                "first",
                QuarantineOptions::severity(QuarantineSeverity::Critical),
            )
            .await
            .unwrap();
        service
            .quarantine_user(
                "user-3",
                "second",
                QuarantineOptions::severity(QuarantineSeverity::Low),
            )
            .await
            .unwrap();

        let entry = service
            .get_entry(QuarantineType::User, "user-3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.reason, "second");
        // Low tier has no wildcard, so a random action is allowed again.
        let check = service
            .is_action_allowed(QuarantineType::User, "user-3", "posting")
            .await
            .unwrap();
        assert!(check.allowed);
    }
}
