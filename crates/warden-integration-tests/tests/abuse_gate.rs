//! Gating trial and invite attempts through the full stack.

mod common;

use std::net::IpAddr;

use warden_abuse::{Decision, EventType, FingerprintInput, FingerprintStore};
use warden_audit::ActionKind;
use warden_config::Config;
use warden_core::Severity;
use warden_reputation::BlockTier;
use warden_test::fixtures;

use common::Harness;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[tokio::test]
async fn test_weak_signal_is_allowed_without_blocking() {
    let h = Harness::default_config().await;
    h.seed(
        "prior-user",
        &fixtures::full_attempt("192.0.2.50", "dev-old", "alice@example.edu"),
    )
    .await;

    let input = FingerprintInput::new("198.51.100.7").email("bob@example.edu");
    let outcome = h
        .warden
        .gate_attempt(&input, EventType::TrialUsage)
        .await
        .unwrap();

    assert!(outcome.detection.allowed);
    assert_eq!(outcome.detection.decision(), Decision::Allow);
    assert_eq!(outcome.detection.result.matches.email_domain, 1);
    assert_eq!(outcome.detection.score(), 10);
    assert!(outcome.detection.block.is_none());

    assert!(!h.warden.block_status(ip("198.51.100.7")).await.unwrap().blocked);
    assert_eq!(h.alerts.count(), 0);
    assert!(
        h.records()
            .await
            .iter()
            .all(|r| r.action != ActionKind::AbuseDetection)
    );
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_device_blocks_with_configured_ttl() {
    let mut cfg = Config::default();
    cfg.scoring.temp_block_ttl_secs = 900;
    let h = Harness::new(cfg).await;
    h.seed("u1", &fixtures::attempt("192.0.2.1", "dev-shared")).await;
    h.seed("u2", &fixtures::attempt("192.0.2.2", "dev-shared")).await;

    let err = h
        .warden
        .gate_attempt(
            &fixtures::attempt("203.0.113.20", "dev-shared"),
            EventType::TrialUsage,
        )
        .await
        .unwrap_err();
    assert!(err.is_policy_rejection());

    let detection = err.detection().unwrap();
    assert!(!detection.allowed);
    assert!(detection.severity() >= Severity::Medium);
    assert_eq!(detection.result.matches.device, 2);
    assert_eq!(detection.decision(), Decision::TempBlock);

    let entry = detection.block.as_ref().unwrap();
    let BlockTier::Temporary { expires_at } = entry.tier else {
        panic!("expected a temporary block");
    };
    assert_eq!(
        expires_at.signed_duration_since(entry.created_at).num_seconds(),
        900
    );

    let status = h.warden.block_status(ip("203.0.113.20")).await.unwrap();
    assert!(status.blocked);
    assert!(!status.permanent);
    assert_eq!(status.expires_at, Some(expires_at));

    assert_eq!(h.alerts.of_severity(Severity::High).len(), 1);
    let records = h.records().await;
    let audit = records
        .iter()
        .find(|r| r.action == ActionKind::AbuseDetection)
        .unwrap();
    assert_eq!(audit.detail["decision"], "temp_block");
    assert_eq!(audit.detail["blocked"], true);
    assert!(audit.entity_ref.as_deref().unwrap().starts_with("ip_hash:"));
    // The raw IP never reaches the ledger.
    assert!(!audit.detail.to_string().contains("203.0.113.20"));

    // Rejected attempts stay out of the corpus.
    assert_eq!(h.corpus.count().await.unwrap(), 2);
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_critical_score_escalates() {
    let h = Harness::default_config().await;
    h.seed("u1", &fixtures::attempt("198.51.100.9", "dev-x")).await;
    h.seed("u2", &fixtures::attempt("198.51.100.10", "dev-x")).await;

    let err = h
        .warden
        .gate_attempt(
            &fixtures::attempt("198.51.100.9", "dev-x"),
            EventType::InviteAttempt,
        )
        .await
        .unwrap_err();

    let detection = err.detection().unwrap();
    assert_eq!(detection.severity(), Severity::Critical);
    assert_eq!(detection.decision(), Decision::Escalate);
    assert!(detection.block.is_some());
    assert_eq!(h.alerts.of_severity(Severity::Critical).len(), 1);
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_blocked_ip_rejected_before_scoring() {
    let h = Harness::default_config().await;
    h.warden
        .block_permanent(&fixtures::admin(), ip("203.0.113.66"), "chargeback fraud")
        .await
        .unwrap();

    let err = h
        .warden
        .gate_attempt(
            &fixtures::attempt("203.0.113.66", "fresh-device"),
            EventType::TrialUsage,
        )
        .await
        .unwrap_err();
    assert!(err.is_policy_rejection());
    assert!(err.detection().is_none());
    assert!(err.to_string().contains("permanently blocked"));

    let records = h.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, ActionKind::AdminOverride);
    assert_eq!(h.alerts.count(), 0);
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_soft_flag_passes_but_stays_out_of_corpus() {
    let h = Harness::default_config().await;
    h.seed("u1", &fixtures::attempt("192.0.2.80", "dev-soft")).await;

    let outcome = h
        .warden
        .gate_attempt(
            &fixtures::attempt("192.0.2.81", "dev-soft"),
            EventType::TrialUsage,
        )
        .await
        .unwrap();
    assert!(outcome.detection.allowed);
    assert!(outcome.is_flagged());
    assert_eq!(outcome.detection.severity(), Severity::Medium);

    assert!(!h.warden.record_usage("u2", &outcome).await.unwrap());
    assert_eq!(h.corpus.count().await.unwrap(), 1);
    assert!(!h.warden.block_status(ip("192.0.2.81")).await.unwrap().blocked);

    let actions: Vec<_> = h.records().await.iter().map(|r| r.action).collect();
    assert_eq!(
        actions,
        vec![ActionKind::AbuseDetection, ActionKind::Registration]
    );
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_record_usage_grows_corpus_and_audits_event_type() {
    let h = Harness::default_config().await;

    let trial = h
        .warden
        .gate_attempt(
            &fixtures::attempt("192.0.2.90", "dev-a"),
            EventType::TrialUsage,
        )
        .await
        .unwrap();
    assert!(h.warden.record_usage("u1", &trial).await.unwrap());

    let invite = h
        .warden
        .gate_attempt(
            &fixtures::attempt("198.51.100.90", "dev-b"),
            EventType::InviteAttempt,
        )
        .await
        .unwrap();
    assert!(h.warden.record_usage("u2", &invite).await.unwrap());

    assert_eq!(h.corpus.count().await.unwrap(), 2);
    let records = h.records().await;
    assert_eq!(records[0].action, ActionKind::Registration);
    assert_eq!(records[1].action, ActionKind::Invite);
    assert_eq!(records[1].actor.id, "u2");

    let err = h.warden.record_usage("", &trial).await.unwrap_err();
    assert!(matches!(err, warden_runtime::WardenError::Validation(_)));
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_ip_is_a_validation_error() {
    let h = Harness::default_config().await;
    let err = h
        .warden
        .gate_attempt(&FingerprintInput::new("not-an-ip"), EventType::TrialUsage)
        .await
        .unwrap_err();
    assert!(matches!(err, warden_runtime::WardenError::Validation(_)));
    assert!(!err.is_policy_rejection());
    h.warden.shutdown().await.unwrap();
}
