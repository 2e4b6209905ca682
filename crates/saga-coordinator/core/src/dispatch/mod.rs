//! # Message Sender
//!
//! Fans a transaction's compensation messages out to its participants.
//!
//! Participants are published in registration order. The first publish
//! failure aborts the batch and leaves the record's status untouched, so a
//! later recovery tick resends the whole set.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::codec::MessageCodec;
use crate::error::{CoordinatorError, Result};
use crate::log::CoordinatorLog;
use crate::model::{CompensationMessage, TransactionRecord, TransactionStatus};
use crate::port::{MessageDispatcher, TransactionRepository};

/// Result of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No participants; nothing was published.
    Skipped,
    /// Every participant was published.
    Sent(usize),
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }
}

/// Publishes compensation messages through a [`MessageDispatcher`].
pub struct MessageSender<R: TransactionRepository, D: MessageDispatcher> {
    log: Arc<CoordinatorLog<R>>,
    dispatcher: Arc<D>,
    codec: Arc<dyn MessageCodec>,
}

impl<R: TransactionRepository, D: MessageDispatcher> MessageSender<R, D> {
    pub fn new(
        log: Arc<CoordinatorLog<R>>,
        dispatcher: Arc<D>,
        codec: Arc<dyn MessageCodec>,
    ) -> Self {
        Self {
            log,
            dispatcher,
            codec,
        }
    }

    /// Publish one message per participant, stopping at the first failure.
    pub async fn dispatch(&self, record: &TransactionRecord) -> Result<DispatchOutcome> {
        let participants = record.participants();
        if participants.is_empty() {
            debug!(trans_id = %record.trans_id, "No participants registered, nothing to send");
            return Ok(DispatchOutcome::Skipped);
        }

        for participant in participants {
            let payload = self
                .codec
                .encode_message(&CompensationMessage::from(participant))?;

            if let Err(e) = self
                .dispatcher
                .send(&participant.destination, &participant.pattern, &payload)
                .await
            {
                warn!(
                    trans_id = %record.trans_id,
                    destination = %participant.destination,
                    pattern = %participant.pattern,
                    "Compensation publish failed, aborting batch: {}",
                    e
                );
                return Err(CoordinatorError::Dispatch {
                    trans_id: record.trans_id.clone(),
                    destination: participant.destination.clone(),
                    reason: e.to_string(),
                });
            }
        }

        info!(
            trans_id = %record.trans_id,
            participants = participants.len(),
            "Compensation messages sent"
        );
        Ok(DispatchOutcome::Sent(participants.len()))
    }

    /// Dispatch and, when anything was sent, mark the stored record Commit.
    pub async fn send_message(&self, record: &TransactionRecord) -> Result<DispatchOutcome> {
        let outcome = self.dispatch(record).await?;
        if outcome.is_sent() {
            self.log.flush(&record.trans_id).await?;
            let rows = self
                .log
                .update_status(&record.trans_id, TransactionStatus::Commit)
                .await?;
            if rows == 0 {
                warn!(trans_id = %record.trans_id, "Sent compensation for a record not yet stored");
            }
        }
        Ok(outcome)
    }

    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }
}
