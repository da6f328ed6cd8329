//! Temporary and permanent block tiers through the runtime.

mod common;

use std::net::IpAddr;
use std::time::Duration;

use warden_abuse::EventType;
use warden_config::StorageBackend;
use warden_runtime::{Warden, WardenError};
use warden_test::fixtures;

use common::Harness;

fn ip() -> IpAddr {
    "198.51.100.77".parse().unwrap()
}

async fn assert_short_block_lifts(warden: &Warden) {
    warden
        .reputation()
        .block_temporary(ip(), "probe", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert!(warden.block_status(ip()).await.unwrap().blocked);

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let status = warden.block_status(ip()).await.unwrap();
    assert!(!status.blocked);
    assert!(
        warden
            .gate_attempt(
                &fixtures::attempt("198.51.100.77", "dev-1"),
                EventType::TrialUsage
            )
            .await
            .is_ok()
    );
}

#[tokio::test]
async fn test_temporary_block_lifts_after_ttl() {
    let h = Harness::default_config().await;
    assert_short_block_lifts(&h.warden).await;
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_temporary_block_lifts_after_ttl_on_durable_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = warden_config::Config::default();
    cfg.reputation.backend = StorageBackend::Durable;
    cfg.ledger.data_dir = Some(dir.path().to_string_lossy().into_owned());
    let warden = Warden::from_config(&cfg).await.unwrap();
    assert_short_block_lifts(&warden).await;
    warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_wins_over_temporary() {
    let h = Harness::default_config().await;
    h.warden
        .reputation()
        .block_temporary(ip(), "abuse score 70", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    h.warden
        .block_permanent(&fixtures::admin(), ip(), "confirmed fraud")
        .await
        .unwrap();

    let status = h.warden.block_status(ip()).await.unwrap();
    assert!(status.blocked);
    assert!(status.permanent);
    assert_eq!(status.reason.as_deref(), Some("confirmed fraud"));

    // Still blocked once the temporary entry would have lapsed.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let status = h.warden.block_status(ip()).await.unwrap();
    assert!(status.blocked);
    assert!(status.permanent);
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unblock_clears_either_tier() {
    let h = Harness::default_config().await;

    h.warden
        .reputation()
        .block_temporary(ip(), "abuse score 65", None)
        .await
        .unwrap();
    assert!(h.warden.unblock(&fixtures::admin(), ip()).await.unwrap());
    assert!(!h.warden.block_status(ip()).await.unwrap().blocked);

    h.warden
        .reputation()
        .block_temporary(ip(), "abuse score 65", None)
        .await
        .unwrap();
    h.warden
        .block_permanent(&fixtures::admin(), ip(), "fraud")
        .await
        .unwrap();
    assert!(h.warden.unblock(&fixtures::admin(), ip()).await.unwrap());
    assert!(!h.warden.block_status(ip()).await.unwrap().blocked);

    assert!(!h.warden.unblock(&fixtures::admin(), ip()).await.unwrap());
    h.warden.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_admin_overrides_are_privileged_and_audited() {
    let h = Harness::default_config().await;
    let member = fixtures::member("coach-1");

    assert!(matches!(
        h.warden.block_permanent(&member, ip(), "spam").await,
        Err(WardenError::Unauthorized { .. })
    ));
    assert!(matches!(
        h.warden.unblock(&member, ip()).await,
        Err(WardenError::Unauthorized { .. })
    ));

    h.warden
        .block_permanent(&fixtures::admin(), ip(), "spam")
        .await
        .unwrap();
    h.warden.unblock(&fixtures::admin(), ip()).await.unwrap();

    let records = h.records().await;
    assert_eq!(records.len(), 2);
    assert!(
        records
            .iter()
            .all(|r| r.action == warden_audit::ActionKind::AdminOverride)
    );
    assert_eq!(records[0].detail["operation"], "block_permanent");
    assert_eq!(records[1].detail["operation"], "unblock");
    assert_eq!(records[0].actor, fixtures::admin());
    h.warden.shutdown().await.unwrap();
}
