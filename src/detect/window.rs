//! Sliding-window attack detection — brute force, distributed attacks, and
//! credential stuffing over store-backed time-ordered counters.
//!
//! All three sub-detectors share the same counting primitive (sorted-set
//! add, prune-by-score, cardinality) keyed on different dimensions: the
//! failing identifier, the fan-in of sources against one target, and the
//! fan-out of usernames from one source.
//!
//! Store errors are surfaced to the caller. Treating "can't count" as "not
//! blocked" would silently disable a security control; callers are expected
//! to fail closed (deny or step up auth) when these operations error.

use crate::config::DetectionConfig;
use crate::error::StoreError;
use crate::store::Store;
use crate::threat::{IndicatorKind, Threat, ThreatIndicator, ThreatLevel, ThreatType};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of recording one failed attempt.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    /// Attempts within the window, including this one.
    pub count: u64,
    /// Whether this attempt pushed the identifier over its allowance.
    pub blocked: bool,
    /// Emitted when the identifier was blocked.
    pub threat: Option<Threat>,
}

/// Attempt type for login-path failures.
pub const ATTEMPT_LOGIN: &str = "login";

/// Store-backed sliding-window detector.
///
/// Windows are tracked per attempt type (login, api, otp, ...), so blocking
/// an identifier for one kind of abuse does not consume another kind's
/// allowance.
pub struct WindowDetector<S: Store> {
    store: Arc<S>,
    config: DetectionConfig,
}

impl<S: Store> WindowDetector<S> {
    pub fn new(store: Arc<S>, config: DetectionConfig) -> Self {
        Self { store, config }
    }

    fn window_key(attempt_type: &str, identifier: &str) -> String {
        format!("rampart:window:{attempt_type}:{identifier}")
    }

    fn block_key(attempt_type: &str, identifier: &str) -> String {
        format!("rampart:block:{attempt_type}:{identifier}")
    }

    fn fanin_key(target: &str) -> String {
        format!("rampart:fanin:{target}")
    }

    fn fanout_key(source: &str) -> String {
        format!("rampart:fanout:{source}")
    }

    /// Add one timestamped entry to the identifier's window, prune entries
    /// older than the window, and re-derive the count.
    ///
    /// An attempt beyond the configured allowance blocks the identifier for
    /// the lockout duration and emits a threat leveled by the highest
    /// satisfied escalation tier.
    pub async fn record_failed_attempt(
        &self,
        attempt_type: &str,
        identifier: &str,
    ) -> Result<AttemptOutcome, StoreError> {
        let key = Self::window_key(attempt_type, identifier);
        let count = self.bump_window(&key, &Uuid::new_v4().to_string()).await?;

        if count >= self.config.escalation.warning {
            tracing::warn!(
                attempt_type,
                identifier,
                count,
                "failed-attempt count in warning tier"
            );
        }

        if count <= self.config.max_attempts {
            return Ok(AttemptOutcome {
                count,
                blocked: false,
                threat: None,
            });
        }

        self.store
            .set_ex(
                &Self::block_key(attempt_type, identifier),
                &count.to_string(),
                self.config.lockout_secs,
            )
            .await?;

        let level = if count >= self.config.escalation.critical {
            ThreatLevel::Critical
        } else if count >= self.config.escalation.elevated {
            ThreatLevel::High
        } else {
            ThreatLevel::Medium
        };

        let mut context = HashMap::new();
        context.insert("attempt_type".to_string(), attempt_type.to_string());
        context.insert("count".to_string(), count.to_string());
        context.insert(
            "window_secs".to_string(),
            self.config.window_secs.to_string(),
        );
        let threat = Threat::new(
            ThreatType::BruteForce,
            level,
            identifier,
            identifier,
            format!(
                "{count} failed {attempt_type} attempts within {}s",
                self.config.window_secs
            ),
        )
        .with_indicator(ThreatIndicator {
            kind: IndicatorKind::Behavior,
            value: "failed_attempt_window".to_string(),
            confidence: 0.9,
            context,
        });

        tracing::info!(attempt_type, identifier, count, level = %level, "identifier blocked");
        Ok(AttemptOutcome {
            count,
            blocked: true,
            threat: Some(threat),
        })
    }

    /// Record a failed login from `source` against `target`, feeding the
    /// per-source window and both distinct trackers.
    pub async fn record_login_failure(
        &self,
        source: &str,
        target: &str,
    ) -> Result<AttemptOutcome, StoreError> {
        self.bump_window(&Self::fanin_key(target), source).await?;
        self.bump_window(&Self::fanout_key(source), target).await?;
        self.record_failed_attempt(ATTEMPT_LOGIN, source).await
    }

    /// Successful authentication resets login brute-force state for the
    /// identifier. Not configurable.
    pub async fn record_successful_login(&self, identifier: &str) -> Result<(), StoreError> {
        self.store
            .del(&Self::window_key(ATTEMPT_LOGIN, identifier))
            .await?;
        Ok(())
    }

    /// Whether the identifier is currently locked out for an attempt type.
    pub async fn is_blocked(
        &self,
        attempt_type: &str,
        identifier: &str,
    ) -> Result<bool, StoreError> {
        self.store
            .exists(&Self::block_key(attempt_type, identifier))
            .await
    }

    /// Distinct sources recorded against one target within the window.
    /// At or above the configured threshold, a critical threat is emitted.
    pub async fn detect_distributed_attack(
        &self,
        target: &str,
    ) -> Result<Option<Threat>, StoreError> {
        let distinct = self.prune_and_count(&Self::fanin_key(target)).await?;
        if distinct < self.config.distributed_sources {
            return Ok(None);
        }
        let mut context = HashMap::new();
        context.insert("distinct_sources".to_string(), distinct.to_string());
        Ok(Some(
            Threat::new(
                ThreatType::BruteForce,
                ThreatLevel::Critical,
                // No single source to name.
                "",
                target,
                format!("{distinct} distinct sources attacking one account"),
            )
            .with_indicator(ThreatIndicator {
                kind: IndicatorKind::Behavior,
                value: "distributed_fan_in".to_string(),
                confidence: 0.95,
                context,
            }),
        ))
    }

    /// Distinct usernames attempted from one source within the window.
    /// At or above the configured threshold, a critical threat is emitted.
    pub async fn detect_credential_stuffing(
        &self,
        source: &str,
    ) -> Result<Option<Threat>, StoreError> {
        let distinct = self.prune_and_count(&Self::fanout_key(source)).await?;
        if distinct < self.config.stuffing_usernames {
            return Ok(None);
        }
        let mut context = HashMap::new();
        context.insert("distinct_usernames".to_string(), distinct.to_string());
        Ok(Some(
            Threat::new(
                ThreatType::CredentialStuffing,
                ThreatLevel::Critical,
                source,
                // No single account to name.
                "",
                format!("{distinct} distinct usernames attempted from one source"),
            )
            .with_indicator(ThreatIndicator {
                kind: IndicatorKind::Behavior,
                value: "credential_fan_out".to_string(),
                confidence: 0.95,
                context,
            }),
        ))
    }

    /// The shared counting primitive: add(now) -> prune -> count, with a
    /// TTL on the whole window so idle keys age out of the store.
    async fn bump_window(&self, key: &str, member: &str) -> Result<u64, StoreError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        self.store.zadd(key, member, now_ms).await?;
        let count = self.prune_and_count_at(key, now_ms).await?;
        self.store.expire(key, self.config.window_secs).await?;
        Ok(count)
    }

    async fn prune_and_count(&self, key: &str) -> Result<u64, StoreError> {
        self.prune_and_count_at(key, Utc::now().timestamp_millis() as f64)
            .await
    }

    async fn prune_and_count_at(&self, key: &str, now_ms: f64) -> Result<u64, StoreError> {
        let cutoff = now_ms - (self.config.window_secs * 1000) as f64;
        self.store
            .zremrangebyscore(key, f64::NEG_INFINITY, cutoff)
            .await?;
        self.store.zcard(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use pretty_assertions::assert_eq;

    fn detector() -> WindowDetector<MemoryStore> {
        WindowDetector::new(Arc::new(MemoryStore::new()), DetectionConfig::default())
    }

    #[tokio::test]
    async fn fifth_attempt_allowed_sixth_blocks() {
        let detector = detector();
        for i in 1..=5 {
            let outcome = detector.record_failed_attempt(ATTEMPT_LOGIN, "10.0.0.1").await.unwrap();
            assert_eq!(outcome.count, i);
            assert!(!outcome.blocked, "attempt {i} should not block");
        }

        let outcome = detector.record_failed_attempt(ATTEMPT_LOGIN, "10.0.0.1").await.unwrap();
        assert!(outcome.blocked);
        let threat = outcome.threat.unwrap();
        assert!(threat.level >= ThreatLevel::Medium);
        assert_eq!(threat.threat_type, ThreatType::BruteForce);
        assert!(detector.is_blocked(ATTEMPT_LOGIN, "10.0.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn attempt_types_have_independent_windows() {
        let detector = detector();
        for _ in 0..6 {
            detector
                .record_failed_attempt(ATTEMPT_LOGIN, "user-1")
                .await
                .unwrap();
        }
        assert!(detector.is_blocked(ATTEMPT_LOGIN, "user-1").await.unwrap());
        assert!(!detector.is_blocked("otp", "user-1").await.unwrap());

        // The other type starts from its own empty window.
        let outcome = detector.record_failed_attempt("otp", "user-1").await.unwrap();
        assert_eq!(outcome.count, 1);
        assert!(!outcome.blocked);
        let threat = outcome.threat;
        assert!(threat.is_none());
    }

    #[tokio::test]
    async fn threat_level_follows_escalation_tiers() {
        let detector = detector();
        let mut last = None;
        for _ in 0..9 {
            last = Some(detector.record_failed_attempt(ATTEMPT_LOGIN, "ip").await.unwrap());
        }
        // Count 9: blocked, below elevated tier.
        assert_eq!(last.as_ref().unwrap().count, 9);
        assert_eq!(
            last.unwrap().threat.unwrap().level,
            ThreatLevel::Medium
        );

        let outcome = detector.record_failed_attempt(ATTEMPT_LOGIN, "ip").await.unwrap();
        assert_eq!(outcome.count, 10);
        assert_eq!(outcome.threat.unwrap().level, ThreatLevel::High);

        let mut outcome = None;
        for _ in 11..=20 {
            outcome = Some(detector.record_failed_attempt(ATTEMPT_LOGIN, "ip").await.unwrap());
        }
        assert_eq!(outcome.as_ref().unwrap().count, 20);
        assert_eq!(outcome.unwrap().threat.unwrap().level, ThreatLevel::Critical);
    }

    #[tokio::test]
    async fn successful_login_resets_window() {
        let detector = detector();
        for _ in 0..4 {
            detector.record_failed_attempt(ATTEMPT_LOGIN, "user-1").await.unwrap();
        }
        detector.record_successful_login("user-1").await.unwrap();

        let outcome = detector.record_failed_attempt(ATTEMPT_LOGIN, "user-1").await.unwrap();
        assert_eq!(outcome.count, 1);
        assert!(!outcome.blocked);
    }

    #[tokio::test]
    async fn distributed_attack_needs_distinct_sources() {
        let detector = detector();
        for i in 0..9 {
            detector
                .record_login_failure(&format!("198.51.100.{i}"), "victim")
                .await
                .unwrap();
        }
        assert!(
            detector
                .detect_distributed_attack("victim")
                .await
                .unwrap()
                .is_none()
        );

        detector
            .record_login_failure("198.51.100.9", "victim")
            .await
            .unwrap();
        let threat = detector
            .detect_distributed_attack("victim")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(threat.level, ThreatLevel::Critical);
        assert_eq!(threat.target, "victim");
    }

    #[tokio::test]
    async fn repeat_sources_do_not_inflate_distinct_count() {
        let detector = detector();
        for _ in 0..30 {
            detector
                .record_login_failure("203.0.113.7", "victim")
                .await
                .unwrap();
        }
        assert!(
            detector
                .detect_distributed_attack("victim")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn credential_stuffing_threshold() {
        let detector = detector();
        for i in 0..19 {
            detector
                .record_login_failure("203.0.113.9", &format!("user-{i}"))
                .await
                .unwrap();
        }
        assert!(
            detector
                .detect_credential_stuffing("203.0.113.9")
                .await
                .unwrap()
                .is_none()
        );

        detector
            .record_login_failure("203.0.113.9", "user-19")
            .await
            .unwrap();
        let threat = detector
            .detect_credential_stuffing("203.0.113.9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(threat.threat_type, ThreatType::CredentialStuffing);
        assert_eq!(threat.level, ThreatLevel::Critical);
    }
}
