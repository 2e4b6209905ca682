//! # CoordinatorHarness
//!
//! Wires a [`Coordinator`] to in-memory adapters so integration tests can
//! drive it and inspect storage and published messages directly.
//!
//! ```rust,ignore
//! let harness = CoordinatorHarness::builder()
//!     .with_config(CoordinatorConfig::new().with_worker_threads(2))
//!     .build()
//!     .await?;
//!
//! let ctx = CallContext::new();
//! harness.manager().begin(&ctx, TargetDescriptor::new("orders", "place")).await?;
//! harness.drain().await;
//! ```

use saga_coordinator_core::config::{CoordinatorConfig, StaticIdentity};
use saga_coordinator_core::coordinator::Coordinator;
use saga_coordinator_core::error::Result;
use saga_coordinator_core::model::{CompensationInvocation, Participant, TransId};
use saga_coordinator_core::registry::CompensationRegistry;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::memory_dispatcher::InMemoryMessageDispatcher;
use crate::memory_repository::InMemoryTransactionRepository;

/// Coordinator type used throughout the test suite.
pub type TestCoordinator = Coordinator<InMemoryTransactionRepository, InMemoryMessageDispatcher>;

/// Builder for [`CoordinatorHarness`].
pub struct HarnessBuilder {
    config: CoordinatorConfig,
    registry: CompensationRegistry,
    repository: InMemoryTransactionRepository,
    dispatcher: InMemoryMessageDispatcher,
}

impl Default for HarnessBuilder {
    fn default() -> Self {
        Self {
            config: test_config(),
            registry: CompensationRegistry::new(),
            repository: InMemoryTransactionRepository::new(),
            dispatcher: InMemoryMessageDispatcher::new(),
        }
    }
}

impl HarnessBuilder {
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: CompensationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_repository(mut self, repository: InMemoryTransactionRepository) -> Self {
        self.repository = repository;
        self
    }

    /// Build the coordinator.
    pub async fn build(self) -> Result<CoordinatorHarness> {
        let coordinator = Coordinator::builder()
            .with_repository(Arc::new(self.repository.clone()))
            .with_dispatcher(Arc::new(self.dispatcher.clone()))
            .with_registry(self.registry)
            .with_identity(Arc::new(StaticIdentity("saga-coordinator-tests".to_string())))
            .with_config(self.config)
            .build()
            .await?;

        Ok(CoordinatorHarness {
            coordinator,
            repository: self.repository,
            dispatcher: self.dispatcher,
        })
    }
}

/// A running coordinator plus handles to its in-memory adapters.
pub struct CoordinatorHarness {
    pub coordinator: TestCoordinator,
    pub repository: InMemoryTransactionRepository,
    pub dispatcher: InMemoryMessageDispatcher,
}

impl CoordinatorHarness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder::default()
    }

    /// Harness with the default test configuration.
    pub async fn start() -> Result<Self> {
        Self::builder().build().await
    }

    /// Wait until every queued action has reached the repository.
    pub async fn drain(&self) {
        self.coordinator.log().wait_idle().await;
    }
}

impl Deref for CoordinatorHarness {
    type Target = TestCoordinator;

    fn deref(&self) -> &Self::Target {
        &self.coordinator
    }
}

/// Small, fast configuration: two lanes, recovery off, zero threshold.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::new()
        .with_queue_capacity(64)
        .with_worker_threads(2)
        .with_recovery(false)
        .with_recovery_initial_delay(Duration::from_millis(10))
        .with_recovery_interval(Duration::from_millis(20))
        .with_recovery_threshold(Duration::ZERO)
}

/// Participant whose compensation calls `action_key` with `args`.
pub fn participant(
    trans_id: &TransId,
    destination: &str,
    action_key: &str,
    args: Vec<serde_json::Value>,
) -> Participant {
    let invocation = args
        .into_iter()
        .fold(CompensationInvocation::new(action_key), |inv, arg| inv.with_arg(arg));
    Participant::new(trans_id.clone(), destination, action_key, invocation)
}
