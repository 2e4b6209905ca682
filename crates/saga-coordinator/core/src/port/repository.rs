//! TransactionRepository port trait definition.
//!
//! This module defines the [`TransactionRepository`] trait that storage
//! backends implement to persist [`TransactionRecord`]s.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::CoordinatorConfig;
use crate::model::{TransId, TransactionRecord, TransactionStatus};

/// Durable store for transaction records.
///
/// Implementations must provide atomic single-record writes. No cross-record
/// transactions are required. Write methods return the number of rows
/// affected so callers can tell a missing record from a successful write.
///
/// All mutations issued by the coordinator go through the
/// [`CoordinatorLog`](crate::log::CoordinatorLog), which applies actions for
/// the same transaction id in submission order.
#[async_trait]
pub trait TransactionRepository: Send + Sync + 'static {
    /// The error type for this implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Prepare storage for the given namespace (table suffix, key prefix, ...).
    async fn init(&self, namespace: &str, config: &CoordinatorConfig) -> Result<(), Self::Error>;

    /// Insert a new record.
    async fn create(&self, record: &TransactionRecord) -> Result<usize, Self::Error>;

    /// Fetch a record by id.
    async fn find_by_trans_id(
        &self,
        trans_id: &TransId,
    ) -> Result<Option<TransactionRecord>, Self::Error>;

    /// Delete a record.
    async fn remove(&self, trans_id: &TransId) -> Result<usize, Self::Error>;

    /// Overwrite a whole record.
    async fn update(&self, record: &TransactionRecord) -> Result<usize, Self::Error>;

    /// Overwrite only the participant list of a record.
    async fn update_participants(&self, record: &TransactionRecord)
    -> Result<usize, Self::Error>;

    /// Overwrite only the status of a record.
    async fn update_status(
        &self,
        trans_id: &TransId,
        status: TransactionStatus,
    ) -> Result<usize, Self::Error>;

    /// Records with status `Begin` created strictly before `cutoff`.
    async fn list_stale_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TransactionRecord>, Self::Error>;
}
