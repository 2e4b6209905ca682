//! # Coordinator
//!
//! Process-scoped owner of every coordinator component. Build it once at
//! startup with [`CoordinatorBuilder`] and pass it (or the components it
//! exposes) to call sites by reference.
//!
//! ```rust,ignore
//! let coordinator = Coordinator::builder()
//!     .with_repository(repository)
//!     .with_dispatcher(dispatcher)
//!     .with_registry(registry)
//!     .with_config(EnvConfig::load_coordinator_config())
//!     .build()
//!     .await?;
//!
//! coordinator
//!     .interceptor()
//!     .intercept(&ctx, target, inbound, |ctx| async move { place_order(ctx).await })
//!     .await?;
//!
//! coordinator.shutdown().await;
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::codec::MessageCodec;
use crate::config::{ApplicationIdentity, CoordinatorConfig, ProcessIdentity};
use crate::dispatch::MessageSender;
use crate::error::{CoordinatorError, Result};
use crate::interceptor::TransactionInterceptor;
use crate::log::CoordinatorLog;
use crate::port::{MessageDispatcher, TransactionRepository};
use crate::processor::{MessageProcessor, ProcessOutcome};
use crate::recovery::{RecoveryReport, RecoveryScheduler};
use crate::registry::CompensationRegistry;
use crate::transaction::TransactionManager;

/// Builder for [`Coordinator`].
pub struct CoordinatorBuilder<R: TransactionRepository, D: MessageDispatcher> {
    repository: Option<Arc<R>>,
    dispatcher: Option<Arc<D>>,
    config: CoordinatorConfig,
    registry: CompensationRegistry,
    identity: Arc<dyn ApplicationIdentity>,
    codec: Option<Arc<dyn MessageCodec>>,
}

impl<R: TransactionRepository, D: MessageDispatcher> Default for CoordinatorBuilder<R, D> {
    fn default() -> Self {
        Self {
            repository: None,
            dispatcher: None,
            config: CoordinatorConfig::default(),
            registry: CompensationRegistry::new(),
            identity: Arc::new(ProcessIdentity),
            codec: None,
        }
    }
}

impl<R: TransactionRepository, D: MessageDispatcher> CoordinatorBuilder<R, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repository(mut self, repository: Arc<R>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<D>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_registry(mut self, registry: CompensationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn ApplicationIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Override the codec selected by `config.codec`.
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Initialize the repository, start the log and, when enabled, recovery.
    pub async fn build(self) -> Result<Coordinator<R, D>> {
        self.config.validate()?;
        let repository = self
            .repository
            .ok_or_else(|| CoordinatorError::Configuration("repository is required".to_string()))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| CoordinatorError::Configuration("dispatcher is required".to_string()))?;
        let codec = self
            .codec
            .unwrap_or_else(|| Arc::from(self.config.codec.create_codec()));

        let namespace = self
            .config
            .resolve_repository_suffix(self.identity.as_ref());
        repository
            .init(&namespace, &self.config)
            .await
            .map_err(CoordinatorError::persistence)?;

        let log = CoordinatorLog::start(repository, &self.config)?;
        let sender = Arc::new(MessageSender::new(
            Arc::clone(&log),
            dispatcher,
            Arc::clone(&codec),
        ));
        let processor = Arc::new(MessageProcessor::new(
            Arc::clone(&log),
            Arc::new(self.registry),
            Arc::clone(&codec),
        ));
        let manager = Arc::new(TransactionManager::new(
            Arc::clone(&log),
            Arc::clone(&sender),
        ));
        let interceptor = Arc::new(TransactionInterceptor::new(
            Arc::clone(&manager),
            Arc::clone(&codec),
        ));
        let recovery = Arc::new(RecoveryScheduler::new(
            Arc::clone(&log),
            Arc::clone(&sender),
            &self.config,
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        let recovery_task = self
            .config
            .recovery_enabled
            .then(|| Arc::clone(&recovery).spawn(shutdown_tx.subscribe()));

        info!(
            namespace = %namespace,
            codec = codec.codec_id(),
            recovery = self.config.recovery_enabled,
            "Coordinator started"
        );

        Ok(Coordinator {
            config: self.config,
            namespace,
            codec,
            log,
            sender,
            processor,
            manager,
            interceptor,
            recovery,
            shutdown_tx,
            recovery_task: Mutex::new(recovery_task),
        })
    }
}

/// All coordinator components wired together.
pub struct Coordinator<R: TransactionRepository, D: MessageDispatcher> {
    config: CoordinatorConfig,
    namespace: String,
    codec: Arc<dyn MessageCodec>,
    log: Arc<CoordinatorLog<R>>,
    sender: Arc<MessageSender<R, D>>,
    processor: Arc<MessageProcessor<R>>,
    manager: Arc<TransactionManager<R, D>>,
    interceptor: Arc<TransactionInterceptor<R, D>>,
    recovery: Arc<RecoveryScheduler<R, D>>,
    shutdown_tx: broadcast::Sender<()>,
    recovery_task: Mutex<Option<JoinHandle<()>>>,
}

impl<R: TransactionRepository, D: MessageDispatcher> Coordinator<R, D> {
    pub fn builder() -> CoordinatorBuilder<R, D> {
        CoordinatorBuilder::new()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Namespace handed to `TransactionRepository::init`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    pub fn log(&self) -> &Arc<CoordinatorLog<R>> {
        &self.log
    }

    pub fn sender(&self) -> &Arc<MessageSender<R, D>> {
        &self.sender
    }

    pub fn processor(&self) -> &Arc<MessageProcessor<R>> {
        &self.processor
    }

    pub fn manager(&self) -> &Arc<TransactionManager<R, D>> {
        &self.manager
    }

    pub fn interceptor(&self) -> &Arc<TransactionInterceptor<R, D>> {
        &self.interceptor
    }

    /// Handle an inbound compensation payload.
    pub async fn process_message(&self, payload: &[u8]) -> Result<ProcessOutcome> {
        self.processor.process_message(payload).await
    }

    /// Run one recovery scan now, regardless of `recovery_enabled`.
    pub async fn recover_now(&self) -> Result<RecoveryReport> {
        self.recovery.tick().await
    }

    /// True while the background recovery task is running.
    pub fn recovery_running(&self) -> bool {
        self.recovery_task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop recovery, drain the log and join its workers.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let task = self.recovery_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Recovery task panicked: {}", e);
            }
        }
        self.log.shutdown().await;
        info!(namespace = %self.namespace, "Coordinator stopped");
    }
}
