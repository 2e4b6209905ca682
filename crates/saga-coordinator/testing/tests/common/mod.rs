//! Shared helpers for the integration tests.

#![allow(dead_code)]

use saga_coordinator_core::{
    CompensationRegistry, HandlerError, TargetDescriptor, TransactionInterceptor,
};
use saga_coordinator_testing::{
    CoordinatorHarness, InMemoryMessageDispatcher, InMemoryTransactionRepository, test_config,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub type TestInterceptor =
    TransactionInterceptor<InMemoryTransactionRepository, InMemoryMessageDispatcher>;

/// Wait until `condition` holds, failing the test after one second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

/// Harness whose registry holds `inventory.release`, a compensating action
/// that records its outcome through the interceptor like production handlers.
///
/// The action fails while the counter is below `failures_before_success`.
pub struct CompensatingHarness {
    pub harness: CoordinatorHarness,
    pub executions: Arc<AtomicUsize>,
}

pub async fn compensating_harness(failures_before_success: usize) -> CompensatingHarness {
    let executions = Arc::new(AtomicUsize::new(0));
    let slot: Arc<OnceLock<Arc<TestInterceptor>>> = Arc::new(OnceLock::new());

    let mut registry = CompensationRegistry::new();
    {
        let executions = Arc::clone(&executions);
        let slot = Arc::clone(&slot);
        registry.register_fn("inventory.release", move |ctx, _args| {
            let executions = Arc::clone(&executions);
            let interceptor = slot.get().cloned();
            async move {
                let interceptor =
                    interceptor.ok_or_else(|| HandlerError::failed("interceptor not wired"))?;
                interceptor
                    .intercept(
                        &ctx,
                        TargetDescriptor::new("inventory", "release"),
                        None,
                        |_ctx| async move {
                            let attempt = executions.fetch_add(1, Ordering::SeqCst);
                            if attempt < failures_before_success {
                                Err(HandlerError::failed("stock service unavailable"))
                            } else {
                                Ok(Value::Null)
                            }
                        },
                    )
                    .await
                    .map_err(|e| HandlerError::failed(e.to_string()))
            }
        });
    }

    let harness = CoordinatorHarness::builder()
        .with_config(test_config())
        .with_registry(registry)
        .build()
        .await
        .unwrap();
    let _ = slot.set(Arc::clone(harness.interceptor()));

    CompensatingHarness {
        harness,
        executions,
    }
}
