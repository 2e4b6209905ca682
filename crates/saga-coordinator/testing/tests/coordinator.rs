//! Coordinator construction, namespace resolution and shutdown.

use saga_coordinator_core::{
    CallContext, Coordinator, CoordinatorError, StaticIdentity, TargetDescriptor,
};
use saga_coordinator_testing::{
    CoordinatorHarness, InMemoryMessageDispatcher, InMemoryTransactionRepository, test_config,
};
use std::sync::Arc;

#[tokio::test]
async fn test_blank_suffix_falls_back_to_identity() {
    let harness = CoordinatorHarness::start().await.unwrap();

    assert_eq!(harness.namespace(), "saga-coordinator-tests");
    assert_eq!(
        harness.repository.namespace().as_deref(),
        Some("saga-coordinator-tests")
    );
    assert_eq!(harness.codec().codec_id(), "json");
}

#[tokio::test]
async fn test_configured_suffix_wins() {
    let harness = CoordinatorHarness::builder()
        .with_config(test_config().with_repository_suffix("orders"))
        .build()
        .await
        .unwrap();

    assert_eq!(harness.namespace(), "orders");
    assert_eq!(harness.repository.namespace().as_deref(), Some("orders"));
}

#[tokio::test]
async fn test_build_requires_repository() {
    let result = Coordinator::<InMemoryTransactionRepository, InMemoryMessageDispatcher>::builder()
        .with_dispatcher(Arc::new(InMemoryMessageDispatcher::new()))
        .with_identity(Arc::new(StaticIdentity("orders".to_string())))
        .build()
        .await;

    assert!(matches!(result, Err(CoordinatorError::Configuration(_))));
}

#[tokio::test]
async fn test_build_rejects_invalid_config() {
    let result = CoordinatorHarness::builder()
        .with_config(test_config().with_queue_capacity(0))
        .build()
        .await;

    assert!(matches!(result, Err(CoordinatorError::Configuration(_))));
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects_new_work() {
    let harness = CoordinatorHarness::start().await.unwrap();
    let ctx = CallContext::new();
    let record = harness
        .manager()
        .begin(&ctx, TargetDescriptor::new("orders", "place"))
        .await
        .unwrap();

    harness.shutdown().await;

    assert!(harness.repository.get(&record.trans_id).is_some());
    let err = harness
        .manager()
        .begin(&CallContext::new(), TargetDescriptor::new("orders", "place"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordinatorError::Cancelled));
}
