//! # Transaction Manager
//!
//! Per-call lifecycle of a transaction record: `absent -> Begin -> {Commit | Failure}`.
//!
//! Every operation works on an explicit [`CallContext`]. Writes go through the
//! [`CoordinatorLog`] so they never block on durability and land in submission
//! order for their transaction id.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::dispatch::{DispatchOutcome, MessageSender};
use crate::error::{CoordinatorError, Result};
use crate::log::CoordinatorLog;
use crate::model::{
    CoordinatorAction, Participant, PropagationToken, TargetDescriptor, TransId,
    TransactionRecord, TransactionRole, TransactionStatus,
};
use crate::port::{MessageDispatcher, TransactionRepository};

/// Call-scoped transaction state machine.
pub struct TransactionManager<R: TransactionRepository, D: MessageDispatcher> {
    log: Arc<CoordinatorLog<R>>,
    sender: Arc<MessageSender<R, D>>,
}

impl<R: TransactionRepository, D: MessageDispatcher> TransactionManager<R, D> {
    pub fn new(log: Arc<CoordinatorLog<R>>, sender: Arc<MessageSender<R, D>>) -> Self {
        Self { log, sender }
    }

    /// Start a transaction on this call, or reuse the one already bound.
    ///
    /// Re-entry within the same call tree returns the bound record without
    /// persisting it a second time.
    pub async fn begin(&self, ctx: &CallContext, target: TargetDescriptor) -> Result<TransactionRecord> {
        if let Some(record) = ctx.transaction() {
            debug!(trans_id = %record.trans_id, "Reusing transaction bound to call");
            return Ok(record);
        }

        let record = TransactionRecord::start(target);
        self.log.submit(CoordinatorAction::save(record.clone())).await?;
        ctx.bind(record.clone(), record.token(TransactionRole::Start));

        info!(trans_id = %record.trans_id, target = %record.target, "Transaction started");
        Ok(record)
    }

    /// Provider-side entry for an inbound token.
    ///
    /// Downstream calls made from this context carry a `Provider` token for
    /// the same transaction id.
    pub async fn join(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        inbound: &PropagationToken,
    ) -> Result<TransactionRecord> {
        let record =
            TransactionRecord::provider(inbound.trans_id.clone(), target, TransactionStatus::Begin);
        self.log.submit(CoordinatorAction::save(record.clone())).await?;
        ctx.bind(record.clone(), record.token(TransactionRole::Provider));

        debug!(
            trans_id = %record.trans_id,
            inbound_role = %inbound.role,
            "Joined transaction as provider"
        );
        Ok(record)
    }

    /// Provider-side finalize after the local unit of work succeeded.
    pub async fn commit_local(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        trans_id: &TransId,
    ) -> Result<()> {
        self.finish_local(ctx, target, trans_id, TransactionStatus::Commit, None)
            .await
    }

    /// Provider-side finalize after the local unit of work failed.
    ///
    /// A `Failure` record lets a redelivered compensation execute again.
    pub async fn fail_local(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        trans_id: &TransId,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.finish_local(
            ctx,
            target,
            trans_id,
            TransactionStatus::Failure,
            Some(reason.into()),
        )
        .await
    }

    async fn finish_local(
        &self,
        ctx: &CallContext,
        target: TargetDescriptor,
        trans_id: &TransId,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let bound = ctx
            .with_transaction(|record| {
                (record.trans_id == *trans_id)
                    .then(|| apply_status(record, status, reason.clone()).map(|_| record.clone()))
            })
            .flatten();

        // The bound record's Save may still be queued; the Update is ordered behind it.
        if let Some(updated) = bound {
            let record = updated?;
            self.log.submit(CoordinatorAction::update(record)).await?;
            debug!(trans_id = %trans_id, status = %status, "Local transaction finished");
            return Ok(());
        }

        // A Save queued by an earlier join on another context must land first.
        self.log.flush(trans_id).await?;
        match self.log.find_by_trans_id(trans_id).await? {
            // A successful redelivery supersedes an earlier failed attempt.
            Some(existing)
                if existing.status.can_transition_to(status)
                    || existing.status == TransactionStatus::Failure =>
            {
                self.log.update_status(trans_id, status).await?;
                debug!(trans_id = %trans_id, status = %status, "Stored transaction finished");
            }
            Some(existing) => {
                warn!(
                    trans_id = %trans_id,
                    from = %existing.status,
                    to = %status,
                    "Ignoring backward status change"
                );
            }
            None => {
                let mut record = TransactionRecord::provider(trans_id.clone(), target, status);
                record.error_message = reason;
                self.log.submit(CoordinatorAction::save(record)).await?;
                debug!(trans_id = %trans_id, status = %status, "Recorded finished provider transaction");
            }
        }
        Ok(())
    }

    /// Append a participant to the bound record and persist only the
    /// participant list.
    pub async fn register_participant(&self, ctx: &CallContext, participant: Participant) -> Result<()> {
        let record = ctx
            .with_transaction(|record| {
                if record.trans_id != participant.trans_id {
                    return Err(CoordinatorError::ParticipantMismatch {
                        current: record.trans_id.clone(),
                        participant: participant.trans_id.clone(),
                    });
                }
                record.register_participant(participant.clone());
                Ok(record.clone())
            })
            .ok_or(CoordinatorError::NoActiveTransaction)??;

        debug!(
            trans_id = %record.trans_id,
            destination = %participant.destination,
            participants = record.participants().len(),
            "Participant registered"
        );
        self.log
            .submit(CoordinatorAction::update_participants(record))
            .await
    }

    /// Dispatch compensation messages for the bound record.
    ///
    /// When anything was sent the record moves to `Commit`. An empty
    /// participant list is a no-op.
    pub async fn send_message(&self, ctx: &CallContext) -> Result<DispatchOutcome> {
        let record = ctx.transaction().ok_or(CoordinatorError::NoActiveTransaction)?;
        let outcome = self.sender.dispatch(&record).await?;

        if outcome.is_sent() {
            let committed = ctx
                .with_transaction(|record| {
                    record
                        .transition_to(TransactionStatus::Commit)
                        .map(|_| record.clone())
                })
                .ok_or(CoordinatorError::NoActiveTransaction)??;
            self.log.submit(CoordinatorAction::update(committed)).await?;
        }
        Ok(outcome)
    }

    /// Mark the bound record failed.
    pub async fn fail(&self, ctx: &CallContext, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let record = ctx
            .with_transaction(|record| record.mark_failed(reason.clone()).map(|_| record.clone()))
            .ok_or(CoordinatorError::NoActiveTransaction)??;

        warn!(trans_id = %record.trans_id, "Transaction failed: {}", reason);
        self.log.submit(CoordinatorAction::update(record)).await
    }

    /// Direct status update, bypassing the queue.
    pub async fn update_status(&self, trans_id: &TransId, status: TransactionStatus) -> Result<usize> {
        self.log.update_status(trans_id, status).await
    }

    /// Record bound to the call, if any.
    pub fn current(&self, ctx: &CallContext) -> Option<TransactionRecord> {
        ctx.transaction()
    }

    pub fn is_begin(&self, ctx: &CallContext) -> bool {
        ctx.is_active()
    }

    /// Drop the call's binding.
    pub fn clean(&self, ctx: &CallContext) {
        ctx.clear();
    }
}

fn apply_status(
    record: &mut TransactionRecord,
    status: TransactionStatus,
    reason: Option<String>,
) -> Result<()> {
    match (status, reason) {
        (TransactionStatus::Failure, Some(reason)) => record.mark_failed(reason),
        (status, _) => record.transition_to(status),
    }
}
