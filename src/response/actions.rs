//! Action handlers invoked by the remediation engine.
//!
//! Handlers are idempotent: re-running an action against the same incident
//! converges on the same store state. Each handler reads its parameters
//! from the playbook step and the affected users/resources from the
//! incident.

use crate::error::ActionError;
use crate::incident::{Incident, IncidentLedger, IncidentStatus, TimelineEntry};
use crate::notify::{
    CHANNEL_OPS_TEAM, CHANNEL_SECURITY_TEAM, CHANNEL_USER, NotificationMessage, Notifier,
};
use crate::store::Store;
use crate::threat::ThreatLevel;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// What a successful handler run reports back to the engine.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub detail: String,
}

impl ActionOutcome {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// A single remediation action. Implementations must be idempotent.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Name the playbook steps refer to.
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        incident: &Incident,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<ActionOutcome, ActionError>;
}

type Params = HashMap<String, serde_json::Value>;

fn duration_secs(params: &Params, default: u64) -> Result<u64, ActionError> {
    match params.get("duration") {
        None => Ok(default),
        Some(v) => v.as_u64().ok_or(ActionError::InvalidParameter {
            name: "duration",
            message: "expected a non-negative integer of seconds".to_string(),
        }),
    }
}

fn ipv4_resources(incident: &Incident) -> impl Iterator<Item = &String> {
    incident
        .affected_resources
        .iter()
        .filter(|r| r.parse::<std::net::Ipv4Addr>().is_ok())
}

/// Blocks each IPv4 affected resource for `duration` seconds (default one
/// hour).
pub struct BlockIpHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> BlockIpHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for BlockIpHandler<S> {
    fn name(&self) -> &'static str {
        "block_ip"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let duration = duration_secs(params, 3600)?;
        let mut blocked = Vec::new();
        for ip in ipv4_resources(incident) {
            let key = format!("rampart:blocklist:{ip}");
            self.store.set_ex(&key, &incident.id, duration).await?;
            blocked.push(ip.clone());
        }
        tracing::info!(incident = %incident.id, count = blocked.len(), "blocked source ips");
        Ok(ActionOutcome::new(format!(
            "blocked {} ip(s) for {duration}s",
            blocked.len()
        )))
    }
}

/// Blocks the /24 network of each IPv4 affected resource. Used for
/// distributed attacks where blocking single addresses is ineffective.
pub struct BlockIpRangeHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> BlockIpRangeHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for BlockIpRangeHandler<S> {
    fn name(&self) -> &'static str {
        "block_ip_range"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let duration = duration_secs(params, 3600)?;
        let mut ranges = std::collections::BTreeSet::new();
        for ip in ipv4_resources(incident) {
            let addr: std::net::Ipv4Addr = ip.parse().map_err(|_| ActionError::Other(
                format!("unparseable ip '{ip}'"),
            ))?;
            let [a, b, c, _] = addr.octets();
            ranges.insert(format!("{a}.{b}.{c}.0/24"));
        }
        for range in &ranges {
            let key = format!("rampart:blocklist:range:{range}");
            self.store.set_ex(&key, &incident.id, duration).await?;
        }
        tracing::info!(incident = %incident.id, count = ranges.len(), "blocked ip ranges");
        Ok(ActionOutcome::new(format!(
            "blocked {} /24 range(s) for {duration}s",
            ranges.len()
        )))
    }
}

/// Locks each affected account, timed by default and permanent when the
/// step passes `permanent: true`.
pub struct LockAccountHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> LockAccountHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for LockAccountHandler<S> {
    fn name(&self) -> &'static str {
        "lock_account"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let permanent = params
            .get("permanent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let duration = duration_secs(params, 1800)?;
        for user in &incident.affected_users {
            let key = format!("rampart:lock:{user}");
            if permanent {
                self.store.set(&key, &incident.id).await?;
            } else {
                self.store.set_ex(&key, &incident.id, duration).await?;
            }
        }
        tracing::info!(
            incident = %incident.id,
            count = incident.affected_users.len(),
            permanent,
            "locked accounts"
        );
        Ok(ActionOutcome::new(format!(
            "locked {} account(s){}",
            incident.affected_users.len(),
            if permanent {
                " permanently".to_string()
            } else {
                format!(" for {duration}s")
            }
        )))
    }
}

/// Marks every session of each affected user revoked. Downstream auth
/// middleware rejects tokens issued before the recorded cutoff.
pub struct RevokeSessionsHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RevokeSessionsHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for RevokeSessionsHandler<S> {
    fn name(&self) -> &'static str {
        "revoke_sessions"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let cutoff = Utc::now().timestamp_millis().to_string();
        for user in &incident.affected_users {
            let key = format!("rampart:sessions:revoked:{user}");
            self.store.set(&key, &cutoff).await?;
        }
        Ok(ActionOutcome::new(format!(
            "revoked sessions for {} user(s)",
            incident.affected_users.len()
        )))
    }
}

/// Requires a password reset before each affected user can sign in again.
pub struct ForcePasswordResetHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> ForcePasswordResetHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for ForcePasswordResetHandler<S> {
    fn name(&self) -> &'static str {
        "force_password_reset"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        for user in &incident.affected_users {
            let key = format!("rampart:password_reset:{user}");
            self.store.set(&key, &incident.id).await?;
        }
        Ok(ActionOutcome::new(format!(
            "password reset required for {} user(s)",
            incident.affected_users.len()
        )))
    }
}

/// Requires a second factor on the next sign-in of each affected user.
pub struct RequireMfaHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> RequireMfaHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for RequireMfaHandler<S> {
    fn name(&self) -> &'static str {
        "require_mfa"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        for user in &incident.affected_users {
            let key = format!("rampart:mfa_required:{user}");
            self.store.set(&key, "1").await?;
        }
        Ok(ActionOutcome::new(format!(
            "mfa required for {} user(s)",
            incident.affected_users.len()
        )))
    }
}

/// Suspends voting rights for each affected user until review.
pub struct SuspendVotingHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> SuspendVotingHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for SuspendVotingHandler<S> {
    fn name(&self) -> &'static str {
        "suspend_voting"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        for user in &incident.affected_users {
            let key = format!("rampart:voting:suspended:{user}");
            self.store.set(&key, &incident.id).await?;
        }
        Ok(ActionOutcome::new(format!(
            "voting suspended for {} user(s)",
            incident.affected_users.len()
        )))
    }
}

/// Flags affected content ids for audit without removing the votes.
pub struct FlagVotesHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> FlagVotesHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for FlagVotesHandler<S> {
    fn name(&self) -> &'static str {
        "flag_votes"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let mut flagged = 0u64;
        for resource in &incident.affected_resources {
            if self
                .store
                .sadd("rampart:votes:flagged", resource)
                .await?
            {
                flagged += 1;
            }
        }
        Ok(ActionOutcome::new(format!(
            "flagged {flagged} content id(s) for vote audit"
        )))
    }
}

/// Raises the platform rate-limiting level. `level` defaults to `strict`.
pub struct EnableRateLimitingHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> EnableRateLimitingHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for EnableRateLimitingHandler<S> {
    fn name(&self) -> &'static str {
        "enable_rate_limiting"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let level = params
            .get("level")
            .and_then(|v| v.as_str())
            .unwrap_or("strict");
        let duration = duration_secs(params, 3600)?;
        self.store
            .set_ex("rampart:ratelimit:level", level, duration)
            .await?;
        tracing::warn!(incident = %incident.id, level, "rate limiting raised");
        Ok(ActionOutcome::new(format!(
            "rate limiting set to '{level}' for {duration}s"
        )))
    }
}

/// Requires captcha on authentication endpoints for a period.
pub struct EnableCaptchaHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> EnableCaptchaHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for EnableCaptchaHandler<S> {
    fn name(&self) -> &'static str {
        "enable_captcha"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let duration = duration_secs(params, 3600)?;
        self.store
            .set_ex("rampart:captcha:enabled", &incident.id, duration)
            .await?;
        Ok(ActionOutcome::new(format!(
            "captcha enabled for {duration}s"
        )))
    }
}

/// Snapshots the incident for later analysis.
pub struct CollectForensicsHandler<S: Store> {
    store: Arc<S>,
}

impl<S: Store> CollectForensicsHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for CollectForensicsHandler<S> {
    fn name(&self) -> &'static str {
        "collect_forensics"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let key = format!("rampart:forensics:{}", incident.id);
        let snapshot = serde_json::to_string(incident)
            .map_err(crate::error::StoreError::from)?;
        self.store.rpush(&key, &snapshot).await?;
        Ok(ActionOutcome::new("incident snapshot captured"))
    }
}

/// Escalates the incident: moves it to `Investigating` and records the
/// requested priority in the timeline. Re-escalating an already-advanced
/// incident only appends to the timeline.
pub struct EscalateHandler {
    ledger: Arc<dyn IncidentLedger>,
}

impl EscalateHandler {
    pub fn new(ledger: Arc<dyn IncidentLedger>) -> Self {
        Self { ledger }
    }
}

#[async_trait]
impl ActionHandler for EscalateHandler {
    fn name(&self) -> &'static str {
        "escalate"
    }

    async fn execute(
        &self,
        incident: &Incident,
        params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let priority = params
            .get("priority")
            .and_then(|v| v.as_str())
            .unwrap_or("P2");
        let current = self.ledger.get(&incident.id).await?;
        if current.status == IncidentStatus::Detected {
            self.ledger
                .update_status(
                    &incident.id,
                    IncidentStatus::Investigating,
                    "remediation",
                    &format!("escalated to {priority}"),
                )
                .await?;
        } else {
            self.ledger
                .add_timeline_entry(
                    &incident.id,
                    TimelineEntry::new(
                        "escalated",
                        "remediation",
                        format!("escalation to {priority} requested at status {}", current.status),
                    ),
                )
                .await?;
        }
        Ok(ActionOutcome::new(format!("escalated to {priority}")))
    }
}

fn severity_for(incident: &Incident) -> ThreatLevel {
    match incident.priority {
        crate::incident::IncidentPriority::P1 => ThreatLevel::Critical,
        crate::incident::IncidentPriority::P2 => ThreatLevel::High,
        crate::incident::IncidentPriority::P3 => ThreatLevel::Medium,
        crate::incident::IncidentPriority::P4 => ThreatLevel::Low,
    }
}

/// Notifies each affected user that action was taken on their account.
pub struct NotifyUserHandler<S: Store> {
    notifier: Arc<Notifier<S>>,
}

impl<S: Store> NotifyUserHandler<S> {
    pub fn new(notifier: Arc<Notifier<S>>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for NotifyUserHandler<S> {
    fn name(&self) -> &'static str {
        "notify_user"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        for user in &incident.affected_users {
            let message = NotificationMessage::new(
                CHANNEL_USER,
                "Security alert on your account",
                format!(
                    "We detected {} activity involving your account and took protective action (incident {}).",
                    incident.threat_type, incident.id
                ),
                severity_for(incident),
            )
            .to_recipient(user.clone());
            self.notifier.send(message).await?;
        }
        Ok(ActionOutcome::new(format!(
            "notified {} user(s)",
            incident.affected_users.len()
        )))
    }
}

/// Sends an incident summary to the security team channel.
pub struct NotifySecurityTeamHandler<S: Store> {
    notifier: Arc<Notifier<S>>,
}

impl<S: Store> NotifySecurityTeamHandler<S> {
    pub fn new(notifier: Arc<Notifier<S>>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for NotifySecurityTeamHandler<S> {
    fn name(&self) -> &'static str {
        "notify_security_team"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let message = NotificationMessage::new(
            CHANNEL_SECURITY_TEAM,
            format!("{} incident {} ({})", incident.threat_type, incident.id, incident.priority),
            format!(
                "{} affected user(s), {} affected resource(s), status {}",
                incident.affected_users.len(),
                incident.affected_resources.len(),
                incident.status
            ),
            severity_for(incident),
        );
        self.notifier.send(message).await?;
        Ok(ActionOutcome::new("security team notified"))
    }
}

/// Sends an incident summary to the ops team channel.
pub struct NotifyOpsTeamHandler<S: Store> {
    notifier: Arc<Notifier<S>>,
}

impl<S: Store> NotifyOpsTeamHandler<S> {
    pub fn new(notifier: Arc<Notifier<S>>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl<S: Store + 'static> ActionHandler for NotifyOpsTeamHandler<S> {
    fn name(&self) -> &'static str {
        "notify_ops_team"
    }

    async fn execute(
        &self,
        incident: &Incident,
        _params: &Params,
    ) -> Result<ActionOutcome, ActionError> {
        let message = NotificationMessage::new(
            CHANNEL_OPS_TEAM,
            format!("{} incident {} ({})", incident.threat_type, incident.id, incident.priority),
            format!(
                "Operational response may be required. {} resource(s) involved.",
                incident.affected_resources.len()
            ),
            severity_for(incident),
        );
        self.notifier.send(message).await?;
        Ok(ActionOutcome::new("ops team notified"))
    }
}

/// The full built-in handler set, keyed by action name.
pub fn builtin_handlers<S: Store + 'static>(
    store: Arc<S>,
    ledger: Arc<dyn IncidentLedger>,
    notifier: Arc<Notifier<S>>,
) -> HashMap<String, Arc<dyn ActionHandler>> {
    let handlers: Vec<Arc<dyn ActionHandler>> = vec![
        Arc::new(BlockIpHandler::new(store.clone())),
        Arc::new(BlockIpRangeHandler::new(store.clone())),
        Arc::new(LockAccountHandler::new(store.clone())),
        Arc::new(RevokeSessionsHandler::new(store.clone())),
        Arc::new(ForcePasswordResetHandler::new(store.clone())),
        Arc::new(RequireMfaHandler::new(store.clone())),
        Arc::new(SuspendVotingHandler::new(store.clone())),
        Arc::new(FlagVotesHandler::new(store.clone())),
        Arc::new(EnableRateLimitingHandler::new(store.clone())),
        Arc::new(EnableCaptchaHandler::new(store.clone())),
        Arc::new(CollectForensicsHandler::new(store.clone())),
        Arc::new(EscalateHandler::new(ledger)),
        Arc::new(NotifyUserHandler::new(notifier.clone())),
        Arc::new(NotifySecurityTeamHandler::new(notifier.clone())),
        Arc::new(NotifyOpsTeamHandler::new(notifier)),
    ];
    handlers
        .into_iter()
        .map(|h| (h.name().to_string(), h))
        .collect()
}
