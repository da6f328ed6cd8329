//! State that must survive a restart on the durable store.

use std::net::IpAddr;

use warden_abuse::{Decision, EventType};
use warden_runtime::Warden;
use warden_test::fixtures;

#[tokio::test]
async fn test_ledger_blocks_and_corpus_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixtures::durable_config(dir.path());
    let blocked: IpAddr = "203.0.113.200".parse().unwrap();

    {
        let warden = Warden::from_config(&cfg).await.unwrap();
        let outcome = warden
            .gate_attempt(
                &fixtures::attempt("192.0.2.200", "dev-durable"),
                EventType::TrialUsage,
            )
            .await
            .unwrap();
        assert!(warden.record_usage("user-1", &outcome).await.unwrap());
        warden
            .record_event(fixtures::login_record("user-1"))
            .await;
        warden
            .block_permanent(&fixtures::admin(), blocked, "fraud")
            .await
            .unwrap();
        warden.flush().await.unwrap();
        warden.shutdown().await.unwrap();
    }

    let warden = Warden::from_config(&cfg).await.unwrap();

    let result = warden.verify_chain().await.unwrap();
    assert!(result.valid);
    assert_eq!(result.records_checked, 3);

    assert!(warden.block_status(blocked).await.unwrap().permanent);

    // The device seen before the restart still counts.
    let outcome = warden
        .gate_attempt(
            &fixtures::attempt("192.0.2.201", "dev-durable"),
            EventType::TrialUsage,
        )
        .await
        .unwrap();
    assert_eq!(outcome.detection.result.matches.device, 1);
    assert_eq!(outcome.detection.decision(), Decision::SoftFlag);

    // New records continue the existing chain.
    warden.record_event(fixtures::login_record("user-2")).await;
    warden.flush().await.unwrap();
    let result = warden.verify_chain().await.unwrap();
    assert!(result.valid);
    assert_eq!(result.records_checked, 5);
    assert_eq!(result.verified_through, 5);
    warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_durable_purge_keeps_anchor_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = fixtures::durable_config(dir.path());
    let old = chrono::Utc::now()
        .checked_sub_signed(chrono::Duration::days(500))
        .unwrap();

    {
        let warden = Warden::from_config(&cfg).await.unwrap();
        for user in ["a", "b"] {
            warden
                .record_event(fixtures::login_record(user).at(old))
                .await;
        }
        warden.record_event(fixtures::login_record("c")).await;
        warden.flush().await.unwrap();

        let report = warden.purge_expired(&fixtures::admin()).await.unwrap();
        assert_eq!(report.ledger.purged, 2);
        warden.flush().await.unwrap();
        warden.shutdown().await.unwrap();
    }

    let warden = Warden::from_config(&cfg).await.unwrap();
    let result = warden.verify_chain().await.unwrap();
    assert!(result.valid);
    // "c" plus the purge's own audit record.
    assert_eq!(result.records_checked, 2);
    assert_eq!(result.verified_through, 4);
    warden.shutdown().await.unwrap();
}
