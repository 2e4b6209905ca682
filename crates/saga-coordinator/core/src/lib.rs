//! # saga-coordinator-core
//!
//! Compensation-based transaction coordination (Saga/TCC style) with zero
//! infrastructure dependencies.
//!
//! An initiator records intent locally, invokes remote participants and, once
//! its own work succeeded, publishes a compensation message to every
//! registered participant. If it crashes before publishing, the recovery
//! scheduler re-drives delivery until all participants converge.
//!
//! ## Architecture
//!
//! Storage and messaging are ports ([`TransactionRepository`],
//! [`MessageDispatcher`]); backends live outside this crate.
//!
//! ## Modules
//!
//! - [`log`]: [`CoordinatorLog`], bounded per-key-ordered write queue
//! - [`recovery`]: [`RecoveryScheduler`], periodic resend of stale transactions
//! - [`dispatch`]: [`MessageSender`], participant fan-out
//! - [`processor`]: [`MessageProcessor`], duplicate-suppressing consumer
//! - [`transaction`]: [`TransactionManager`], call-scoped state machine
//! - [`interceptor`]: [`TransactionInterceptor`], wraps a unit of work
//! - [`propagation`]: token header injection and extraction
//! - [`coordinator`]: [`Coordinator`], wires everything together
//! - [`registry`]: [`CompensationRegistry`], action key to handler table
//! - [`codec`]: [`MessageCodec`] and [`JsonCodec`]
//! - [`context`]: [`CallContext`], per-call state
//! - [`model`]: records, participants, tokens and messages
//! - [`config`], [`error`], [`telemetry`]

pub mod codec;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod interceptor;
pub mod log;
pub mod model;
pub mod port;
pub mod processor;
pub mod propagation;
pub mod recovery;
pub mod registry;
pub mod telemetry;
pub mod transaction;

pub use codec::{CURRENT_WIRE_VERSION, CodecError, CodecType, JsonCodec, MessageCodec};
pub use config::{
    ApplicationIdentity, CoordinatorConfig, EnvConfig, ProcessIdentity, StaticIdentity,
};
pub use context::{CallContext, CallScope};
pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use dispatch::{DispatchOutcome, MessageSender};
pub use error::{CoordinatorError, ErrorKind, Result};
pub use interceptor::{InterceptError, TransactionInterceptor};
pub use log::{CoordinatorLog, CoordinatorLogMetrics, CoordinatorLogMetricsSnapshot};
pub use model::{
    ActionKey, ActionKind, CompensationInvocation, CompensationMessage, CoordinatorAction,
    Participant, PropagationToken, TargetDescriptor, TransId, TransactionRecord,
    TransactionRole, TransactionStatus,
};
pub use port::{MessageDispatcher, TransactionRepository};
pub use processor::{MessageProcessor, ProcessOutcome};
pub use propagation::{TRANSACTION_CONTEXT_HEADER, extract, inject};
pub use recovery::{RecoveryReport, RecoveryScheduler};
pub use registry::{CompensationHandler, CompensationRegistry, FnHandler, HandlerError};
pub use telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
pub use transaction::TransactionManager;
