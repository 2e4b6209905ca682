//! Recovery scan selection and the background scheduler loop.

mod common;

use chrono::Utc;
use common::eventually;
use saga_coordinator_core::{TargetDescriptor, TransactionRecord, TransactionStatus};
use saga_coordinator_testing::{CoordinatorHarness, participant, test_config};
use std::time::Duration;

fn aged(minutes: i64, destinations: &[&str]) -> TransactionRecord {
    let mut record = TransactionRecord::start(TargetDescriptor::new("orders", "place"))
        .with_created_at(Utc::now() - chrono::Duration::minutes(minutes));
    let id = record.trans_id.clone();
    for destination in destinations {
        record.register_participant(participant(&id, destination, "undo", vec![]));
    }
    record
}

async fn harness_with_threshold(threshold: Duration) -> CoordinatorHarness {
    CoordinatorHarness::builder()
        .with_config(test_config().with_recovery_threshold(threshold))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stale_begin_is_candidate_and_commit_is_not() {
    let harness = harness_with_threshold(Duration::from_secs(60)).await;

    let stale = aged(10, &["inventory"]);
    let mut committed = aged(60, &["inventory"]);
    committed.transition_to(TransactionStatus::Commit).unwrap();
    let fresh = aged(0, &["inventory"]);
    harness.repository.insert(stale.clone());
    harness.repository.insert(committed.clone());
    harness.repository.insert(fresh.clone());

    let report = harness.recover_now().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert_eq!(report.resent, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(harness.dispatcher.sent_count(), 1);
    assert_eq!(
        harness.repository.get(&stale.trans_id).unwrap().status,
        TransactionStatus::Commit
    );
    assert_eq!(
        harness.repository.get(&fresh.trans_id).unwrap().status,
        TransactionStatus::Begin
    );
}

#[tokio::test]
async fn test_failed_resend_stays_begin_until_next_tick() {
    let harness = harness_with_threshold(Duration::from_secs(60)).await;
    let stale = aged(5, &["inventory", "payments"]);
    harness.repository.insert(stale.clone());
    harness.dispatcher.fail_destination("payments");

    let report = harness.recover_now().await.unwrap();
    assert_eq!((report.candidates, report.resent, report.failed), (1, 0, 1));
    assert_eq!(
        harness.repository.get(&stale.trans_id).unwrap().status,
        TransactionStatus::Begin
    );

    harness.dispatcher.heal();
    let report = harness.recover_now().await.unwrap();
    assert_eq!(report.resent, 1);
    assert_eq!(
        harness.repository.get(&stale.trans_id).unwrap().status,
        TransactionStatus::Commit
    );

    // Second tick resends the whole set, so the first participant is delivered twice.
    assert_eq!(harness.dispatcher.sent_count(), 3);
}

#[tokio::test]
async fn test_stale_without_participants_is_closed() {
    let harness = harness_with_threshold(Duration::from_secs(1)).await;
    let stale = aged(5, &[]);
    harness.repository.insert(stale.clone());

    let report = harness.recover_now().await.unwrap();

    assert_eq!(report.resent, 1);
    assert_eq!(harness.dispatcher.attempts(), 0);
    assert_eq!(
        harness.repository.get(&stale.trans_id).unwrap().status,
        TransactionStatus::Commit
    );
}

#[tokio::test]
async fn test_scheduler_runs_only_when_enabled() {
    let disabled = CoordinatorHarness::start().await.unwrap();
    assert!(!disabled.recovery_running());

    let harness = CoordinatorHarness::builder()
        .with_config(test_config().with_recovery(true))
        .build()
        .await
        .unwrap();
    assert!(harness.recovery_running());

    let stale = aged(1, &["inventory"]);
    harness.repository.insert(stale.clone());

    let repository = harness.repository.clone();
    eventually(move || {
        repository
            .get(&stale.trans_id)
            .is_some_and(|r| r.status == TransactionStatus::Commit)
    })
    .await;
    assert_eq!(harness.dispatcher.sent_count(), 1);

    harness.shutdown().await;
    assert!(!harness.recovery_running());
}
