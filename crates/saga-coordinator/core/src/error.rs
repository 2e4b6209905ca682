//!
//! # Error Types
//!
//! Central error type for the coordinator. Every failure that crosses a public
//! boundary (`submit`, `send_message`, `process_message`, ...) is reported as a
//! [`CoordinatorError`] whose [`ErrorKind`] classifies it.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;
use crate::model::{TransId, TransactionStatus};

/// Central error type for the coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A repository call failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Publishing a compensation message to a participant failed.
    #[error("Dispatch to '{destination}' failed for transaction {trans_id}: {reason}")]
    Dispatch {
        trans_id: TransId,
        destination: String,
        reason: String,
    },

    /// The local compensating action failed.
    #[error("Execution error for transaction {trans_id}: {reason}")]
    Execution { trans_id: TransId, reason: String },

    /// Encoding or decoding a payload failed.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The coordinator log stopped accepting actions while the caller waited.
    #[error("Coordinator log is shut down")]
    Cancelled,

    /// An operation needed a transaction bound to the call context.
    #[error("No transaction bound to the current call")]
    NoActiveTransaction,

    /// A participant was registered against a different transaction.
    #[error("Participant belongs to {participant}, current transaction is {current}")]
    ParticipantMismatch { current: TransId, participant: TransId },

    /// A status change would move a record backwards.
    #[error("Invalid status transition for {trans_id}: {from} -> {to}")]
    InvalidTransition {
        trans_id: TransId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Kinds of errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Persistence,
    Dispatch,
    Execution,
    Codec,
    Cancelled,
    State,
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Persistence => write!(f, "persistence"),
            ErrorKind::Dispatch => write!(f, "dispatch"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::Codec => write!(f, "codec"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::State => write!(f, "state"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

impl CoordinatorError {
    /// Create a persistence error from any displayable repository error.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Create an execution error.
    pub fn execution(trans_id: &TransId, reason: impl Into<String>) -> Self {
        Self::Execution {
            trans_id: trans_id.clone(),
            reason: reason.into(),
        }
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::Dispatch { .. } => ErrorKind::Dispatch,
            Self::Execution { .. } => ErrorKind::Execution,
            Self::Codec(_) => ErrorKind::Codec,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NoActiveTransaction
            | Self::ParticipantMismatch { .. }
            | Self::InvalidTransition { .. } => ErrorKind::State,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether a later redelivery or recovery tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Persistence | ErrorKind::Dispatch | ErrorKind::Execution
        )
    }
}

/// Result type with coordinator error
pub type Result<T, E = CoordinatorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        let id = TransId::from("t-1");
        assert_eq!(
            CoordinatorError::persistence("disk full").kind(),
            ErrorKind::Persistence
        );
        assert_eq!(
            CoordinatorError::execution(&id, "boom").kind(),
            ErrorKind::Execution
        );
        assert_eq!(CoordinatorError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            CoordinatorError::NoActiveTransaction.kind(),
            ErrorKind::State
        );
    }

    #[test]
    fn test_retryable() {
        let id = TransId::from("t-1");
        let dispatch = CoordinatorError::Dispatch {
            trans_id: id.clone(),
            destination: "inventory".to_string(),
            reason: "broker down".to_string(),
        };
        assert!(dispatch.is_retryable());
        assert!(dispatch.to_string().contains("inventory"));
        assert!(!CoordinatorError::Cancelled.is_retryable());
        assert!(!CoordinatorError::Configuration("x".to_string()).is_retryable());
    }

    #[test]
    fn test_codec_error_conversion() {
        let err: CoordinatorError = CodecError::parse_error("bad bytes").into();
        assert_eq!(err.kind(), ErrorKind::Codec);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Dispatch.to_string(), "dispatch");
        assert_eq!(ErrorKind::State.to_string(), "state");
    }
}
