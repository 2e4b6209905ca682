//! # Recovery Scheduler
//!
//! Periodic scan for transactions whose compensation dispatch may never have
//! happened, e.g. because the initiator crashed between local success and
//! publishing.
//!
//! Each tick lists `Begin` records created before `now - recovery_threshold`
//! and resends their participant set. Ticks never overlap: the next one is
//! scheduled `recovery_interval` after the previous one finished. Only
//! initiators run the scheduler; providers do not own the fan-out.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CoordinatorConfig;
use crate::dispatch::{DispatchOutcome, MessageSender};
use crate::error::{CoordinatorError, Result};
use crate::log::CoordinatorLog;
use crate::model::TransactionStatus;
use crate::port::{MessageDispatcher, TransactionRepository};

/// Outcome of one recovery tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Stale `Begin` records found.
    pub candidates: usize,
    /// Records dispatched successfully and moved to `Commit`.
    pub resent: usize,
    /// Records whose resend failed; they stay `Begin` for the next tick.
    pub failed: usize,
}

/// Fixed-delay scanner re-driving stale transactions.
pub struct RecoveryScheduler<R: TransactionRepository, D: MessageDispatcher> {
    log: Arc<CoordinatorLog<R>>,
    sender: Arc<MessageSender<R, D>>,
    initial_delay: Duration,
    interval: Duration,
    threshold: Duration,
}

impl<R: TransactionRepository, D: MessageDispatcher> RecoveryScheduler<R, D> {
    pub fn new(
        log: Arc<CoordinatorLog<R>>,
        sender: Arc<MessageSender<R, D>>,
        config: &CoordinatorConfig,
    ) -> Self {
        Self {
            log,
            sender,
            initial_delay: config.recovery_initial_delay,
            interval: config.recovery_interval,
            threshold: config.recovery_threshold,
        }
    }

    /// Run one scan.
    pub async fn tick(&self) -> Result<RecoveryReport> {
        let threshold = chrono::Duration::from_std(self.threshold)
            .map_err(|e| CoordinatorError::Configuration(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        let stale = self.log.list_stale_before(cutoff).await?;
        let mut report = RecoveryReport {
            candidates: stale.len(),
            ..Default::default()
        };

        for record in &stale {
            let outcome = match self.sender.dispatch(record).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    report.failed += 1;
                    warn!(trans_id = %record.trans_id, "Recovery resend failed: {}", e);
                    continue;
                }
            };

            match self
                .log
                .update_status(&record.trans_id, TransactionStatus::Commit)
                .await
            {
                Ok(_) => {
                    report.resent += 1;
                    match outcome {
                        DispatchOutcome::Sent(n) => {
                            info!(trans_id = %record.trans_id, participants = n, "Recovered transaction")
                        }
                        DispatchOutcome::Skipped => {
                            debug!(trans_id = %record.trans_id, "Closed stale transaction without participants")
                        }
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    error!(trans_id = %record.trans_id, "Failed to commit recovered transaction: {}", e);
                }
            }
        }

        if report.candidates > 0 {
            info!(
                candidates = report.candidates,
                resent = report.resent,
                failed = report.failed,
                "Recovery tick finished"
            );
        }
        Ok(report)
    }

    /// Run the scan loop until `shutdown` fires.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            initial_delay = ?self.initial_delay,
            interval = ?self.interval,
            threshold = ?self.threshold,
            "Recovery scheduler started"
        );

        let mut delay = self.initial_delay;
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Recovery scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = self.tick().await {
                        error!("Recovery tick failed: {}", e);
                    }
                    delay = self.interval;
                }
            }
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

impl<R: TransactionRepository, D: MessageDispatcher> std::fmt::Debug for RecoveryScheduler<R, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScheduler")
            .field("initial_delay", &self.initial_delay)
            .field("interval", &self.interval)
            .field("threshold", &self.threshold)
            .finish()
    }
}
