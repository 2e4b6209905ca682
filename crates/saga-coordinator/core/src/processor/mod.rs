//! # Message Processor
//!
//! Consumer side of compensation delivery. Decodes an inbound payload,
//! suppresses duplicates and runs the compensating action through the
//! [`CompensationRegistry`].
//!
//! Delivery is at-least-once. A message is treated as already handled when a
//! record for its transaction exists with any status other than `Failure`.
//! The check and the execution run under a lock keyed by transaction id, so
//! concurrent deliveries of the same id execute at most once while unrelated
//! ids proceed in parallel.
//!
//! The outcome is stored as a `Provider` record (`Commit` or `Failure`) when
//! the action did not record one itself, so plain handlers are deduplicated
//! too.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, error, info};

use crate::codec::MessageCodec;
use crate::context::CallContext;
use crate::error::{CoordinatorError, Result};
use crate::log::CoordinatorLog;
use crate::model::{
    CompensationInvocation, CoordinatorAction, PropagationToken, TargetDescriptor, TransId,
    TransactionRecord, TransactionRole, TransactionStatus,
};
use crate::port::TransactionRepository;
use crate::registry::CompensationRegistry;
use crate::telemetry::transaction_span;

/// Result of processing one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The compensating action ran.
    Executed,
    /// The transaction was already handled; nothing ran.
    Duplicate,
}

/// Handles inbound compensation messages.
pub struct MessageProcessor<R: TransactionRepository> {
    log: Arc<CoordinatorLog<R>>,
    registry: Arc<CompensationRegistry>,
    codec: Arc<dyn MessageCodec>,
    locks: DashMap<TransId, Arc<Mutex<()>>>,
}

impl<R: TransactionRepository> MessageProcessor<R> {
    pub fn new(
        log: Arc<CoordinatorLog<R>>,
        registry: Arc<CompensationRegistry>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        Self {
            log,
            registry,
            codec,
            locks: DashMap::new(),
        }
    }

    /// Decode and handle one payload.
    ///
    /// Malformed payloads fail with [`CoordinatorError::Codec`]; handler
    /// failures with [`CoordinatorError::Execution`], leaving the transaction
    /// eligible for redelivery.
    pub async fn process_message(&self, payload: &[u8]) -> Result<ProcessOutcome> {
        let message = self.codec.decode_message(payload).map_err(|e| {
            error!("Rejecting undecodable compensation message: {}", e);
            CoordinatorError::from(e)
        })?;
        let trans_id = message.trans_id.clone();

        let lock = self
            .locks
            .entry(trans_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = lock.lock().await;

            match self.log.find_by_trans_id(&trans_id).await {
                Ok(Some(record)) if record.status != TransactionStatus::Failure => {
                    debug!(
                        trans_id = %trans_id,
                        status = %record.status,
                        "Compensation already handled, skipping"
                    );
                    Ok(ProcessOutcome::Duplicate)
                }
                Ok(_) => self.execute_and_record(&trans_id, &message.invocation).await,
                Err(e) => Err(e),
            }
        };

        drop(lock);
        self.locks
            .remove_if(&trans_id, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Run the action and make sure its outcome is stored before the per-id
    /// lock is released.
    async fn execute_and_record(
        &self,
        trans_id: &TransId,
        invocation: &CompensationInvocation,
    ) -> Result<ProcessOutcome> {
        let executed = self.execute(trans_id, invocation).await;
        // Records written by the action itself land before the outcome check.
        self.log.flush(trans_id).await?;
        self.record_outcome(trans_id, invocation, &executed).await?;
        executed
    }

    /// Store the outcome unless the action already recorded it.
    async fn record_outcome(
        &self,
        trans_id: &TransId,
        invocation: &CompensationInvocation,
        executed: &Result<ProcessOutcome>,
    ) -> Result<()> {
        let status = match executed {
            Ok(_) => TransactionStatus::Commit,
            Err(_) => TransactionStatus::Failure,
        };

        match self.log.find_by_trans_id(trans_id).await? {
            None => {
                let mut record = TransactionRecord::provider(
                    trans_id.clone(),
                    TargetDescriptor::new(invocation.action_key.as_str(), "compensate"),
                    status,
                );
                if let Err(e) = executed {
                    record.error_message = Some(e.to_string());
                }
                self.log.submit(CoordinatorAction::save(record)).await?;
                self.log.flush(trans_id).await?;
                debug!(trans_id = %trans_id, status = %status, "Recorded compensation outcome");
            }
            // A successful redelivery supersedes an earlier failed attempt.
            Some(record)
                if record.status != status
                    && (record.status.can_transition_to(status)
                        || record.status == TransactionStatus::Failure) =>
            {
                self.log.update_status(trans_id, status).await?;
                debug!(
                    trans_id = %trans_id,
                    from = %record.status,
                    to = %status,
                    "Updated compensation outcome"
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn execute(
        &self,
        trans_id: &TransId,
        invocation: &CompensationInvocation,
    ) -> Result<ProcessOutcome> {
        let ctx = CallContext::new();
        let _scope = ctx.scope();
        ctx.set_token(PropagationToken::new(trans_id.clone(), TransactionRole::Local));

        let span = transaction_span(trans_id, TransactionRole::Local, invocation.action_key.as_str());
        match self
            .registry
            .invoke(invocation, ctx.clone())
            .instrument(span)
            .await
        {
            Ok(_) => {
                info!(
                    trans_id = %trans_id,
                    action = %invocation.action_key,
                    "Compensating action executed"
                );
                Ok(ProcessOutcome::Executed)
            }
            Err(e) => {
                error!(
                    trans_id = %trans_id,
                    action = %invocation.action_key,
                    "Compensating action failed: {}",
                    e
                );
                Err(CoordinatorError::execution(trans_id, e.to_string()))
            }
        }
    }

    /// Transaction ids currently holding a lock entry.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }
}
