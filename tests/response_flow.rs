//! End-to-end flow: failed logins cross the sliding-window threshold, the
//! emitted threat opens an incident, the matching playbook runs, and the
//! attacker ends up blocked and quarantined.

use rampart::config::{DetectionConfig, QuarantineConfig, RemediationConfig};
use rampart::detect::{ATTEMPT_LOGIN, WindowDetector};
use rampart::incident::{IncidentLedger, IncidentStatus, MemoryLedger};
use rampart::notify::{CHANNEL_USER, Notifier};
use rampart::quarantine::{QuarantineOptions, QuarantineService, QuarantineSeverity};
use rampart::response::{PlaybookRegistry, RemediationEngine, builtin_handlers};
use rampart::store::{MemoryStore, Store};
use rampart::threat::{ThreatLevel, ThreatType};
use std::sync::Arc;

fn fast_remediation() -> RemediationConfig {
    RemediationConfig {
        retry_backoff_ms: 0,
        ..RemediationConfig::default()
    }
}

#[tokio::test]
async fn brute_force_detection_through_containment() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let notifier = Arc::new(Notifier::new(store.clone()));
    let detector = WindowDetector::new(store.clone(), DetectionConfig::default());
    let engine = RemediationEngine::new(
        store.clone(),
        ledger.clone(),
        PlaybookRegistry::with_defaults(),
        builtin_handlers(store.clone(), ledger.clone(), notifier.clone()),
        fast_remediation(),
    );
    let quarantine = QuarantineService::new(store.clone(), QuarantineConfig::default());

    // Five failures stay within the allowance.
    let mut outcome = None;
    for _ in 0..6 {
        outcome = Some(
            detector
                .record_login_failure("203.0.113.9", "user-1")
                .await
                .unwrap(),
        );
    }
    let outcome = outcome.unwrap();
    assert_eq!(outcome.count, 6);
    assert!(outcome.blocked);
    assert!(
        detector
            .is_blocked(ATTEMPT_LOGIN, "203.0.113.9")
            .await
            .unwrap()
    );

    let mut threat = outcome.threat.expect("block emits a threat");
    assert_eq!(threat.threat_type, ThreatType::BruteForce);

    // Remediate: the brute-force playbook blocks the ip; the account
    // steps run over the (empty) affected-user set.
    let result = engine.respond_to_threat(&mut threat).await.unwrap();
    assert!(result.success);
    assert!(!result.actions_performed.is_empty());
    assert_eq!(threat.mitigation_actions, result.actions_performed);

    let incident = ledger.get(&result.incident_id).await.unwrap();
    assert_eq!(incident.status, IncidentStatus::Contained);
    // The attacking ip is an affected resource, never a user.
    assert!(incident.affected_resources.contains("203.0.113.9"));
    assert!(incident.affected_users.is_empty());

    assert!(store.exists("rampart:blocklist:203.0.113.9").await.unwrap());
    assert!(
        notifier.pending(CHANNEL_USER).await.unwrap().is_empty(),
        "no user accounts were implicated, so none were notified"
    );

    // Quarantine the source ip off the same incident.
    quarantine
        .quarantine_ip(
            "203.0.113.9",
            "brute force origin",
            QuarantineOptions::severity(QuarantineSeverity::High)
                .for_incident(&result.incident_id),
        )
        .await
        .unwrap();
    assert!(
        quarantine
            .is_quarantined(rampart::QuarantineType::Ip, "203.0.113.9")
            .await
            .unwrap()
    );

    // Investigation closes out through the forward-only state machine.
    ledger
        .update_status(
            &result.incident_id,
            IncidentStatus::Resolved,
            "analyst",
            "attacker blocked, account restored",
        )
        .await
        .unwrap();
    assert_eq!(
        ledger.get(&result.incident_id).await.unwrap().status,
        IncidentStatus::Resolved
    );
}

#[tokio::test]
async fn credential_stuffing_fans_out_to_critical_threat() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let notifier = Arc::new(Notifier::new(store.clone()));
    let detector = WindowDetector::new(store.clone(), DetectionConfig::default());
    let engine = RemediationEngine::new(
        store.clone(),
        ledger.clone(),
        PlaybookRegistry::with_defaults(),
        builtin_handlers(store.clone(), ledger.clone(), notifier),
        fast_remediation(),
    );

    for i in 0..20 {
        detector
            .record_login_failure("198.51.100.7", &format!("user-{i}"))
            .await
            .unwrap();
    }
    let mut threat = detector
        .detect_credential_stuffing("198.51.100.7")
        .await
        .unwrap()
        .expect("20 distinct usernames crosses the threshold");
    assert_eq!(threat.threat_type, ThreatType::CredentialStuffing);
    assert_eq!(threat.level, ThreatLevel::Critical);

    let result = engine.respond_to_threat(&mut threat).await.unwrap();
    assert!(result.success);
    assert_eq!(
        ledger.get(&result.incident_id).await.unwrap().status,
        IncidentStatus::Contained
    );
    // The stuffing playbook raises the day-long ip block and captcha.
    assert!(store.exists("rampart:blocklist:198.51.100.7").await.unwrap());
    assert!(store.exists("rampart:captcha:enabled").await.unwrap());
}
