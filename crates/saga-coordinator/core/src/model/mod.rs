//! Data model for the coordinator.
//!
//! This module contains [`TransactionRecord`], [`Participant`],
//! [`CompensationInvocation`], [`CoordinatorAction`], [`PropagationToken`] and
//! [`CompensationMessage`], the types every other module exchanges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};

/// Globally unique transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransId(pub String);

impl TransId {
    /// Generate a new random transaction ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a transaction ID from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TransId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TransId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a transaction record.
///
/// Status only moves forward: `Begin -> Commit` or `Begin -> Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Begin,
    Commit,
    Failure,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Failure => "failure",
        }
    }

    /// Returns true if moving from `self` to `next` keeps the lifecycle forward-only.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == next || matches!(self, Self::Begin)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Begin)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "begin" => Ok(Self::Begin),
            "commit" => Ok(Self::Commit),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("Unknown transaction status: {}", s)),
        }
    }
}

/// Role a service plays in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionRole {
    /// The initiator that owns the compensation fan-out.
    Start,
    /// A remote service invoked with an inbound propagation token.
    Provider,
    /// Local execution of a delivered compensation message.
    Local,
}

impl TransactionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Provider => "provider",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for TransactionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "provider" => Ok(Self::Provider),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown transaction role: {}", s)),
        }
    }
}

/// Identity of the intercepted call that originated a record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Service or component name.
    pub target: String,
    /// Operation name.
    pub method: String,
}

impl TargetDescriptor {
    pub fn new(target: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            method: method.into(),
        }
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.target, self.method)
    }
}

/// Stable key naming a registered compensating action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionKey(pub String);

impl ActionKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to execute to compensate a participant: an action key plus arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationInvocation {
    pub action_key: ActionKey,
    pub args: Vec<Value>,
    /// Declared argument types, one per argument when present.
    #[serde(default)]
    pub arg_types: Vec<String>,
}

impl CompensationInvocation {
    pub fn new(action_key: impl Into<String>) -> Self {
        Self {
            action_key: ActionKey::new(action_key),
            args: Vec::new(),
            arg_types: Vec::new(),
        }
    }

    /// Append an argument without a declared type.
    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    /// Append an argument together with its type descriptor.
    pub fn with_typed_arg(mut self, arg: Value, arg_type: impl Into<String>) -> Self {
        self.args.push(arg);
        self.arg_types.push(arg_type.into());
        self
    }
}

/// One remote unit of compensation work registered against a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub trans_id: TransId,
    /// Message destination (topic, queue or exchange).
    pub destination: String,
    /// Routing pattern within the destination.
    pub pattern: String,
    pub invocation: CompensationInvocation,
}

impl Participant {
    pub fn new(
        trans_id: TransId,
        destination: impl Into<String>,
        pattern: impl Into<String>,
        invocation: CompensationInvocation,
    ) -> Self {
        Self {
            trans_id,
            destination: destination.into(),
            pattern: pattern.into(),
            invocation,
        }
    }
}

/// The coordinator's durable view of one distributed operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub trans_id: TransId,
    pub status: TransactionStatus,
    pub role: TransactionRole,
    pub target: TargetDescriptor,
    participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Reason recorded when the local unit of work failed.
    pub error_message: Option<String>,
}

impl TransactionRecord {
    fn new(
        trans_id: TransId,
        status: TransactionStatus,
        role: TransactionRole,
        target: TargetDescriptor,
    ) -> Self {
        let now = Utc::now();
        Self {
            trans_id,
            status,
            role,
            target,
            participants: Vec::new(),
            created_at: now,
            updated_at: now,
            error_message: None,
        }
    }

    /// New initiator record with a freshly generated id.
    pub fn start(target: TargetDescriptor) -> Self {
        Self::new(
            TransId::new(),
            TransactionStatus::Begin,
            TransactionRole::Start,
            target,
        )
    }

    /// Provider-side record reusing an inbound transaction id.
    pub fn provider(trans_id: TransId, target: TargetDescriptor, status: TransactionStatus) -> Self {
        Self::new(trans_id, status, TransactionRole::Provider, target)
    }

    /// Override the creation time. Used by repositories rehydrating rows.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn has_participants(&self) -> bool {
        !self.participants.is_empty()
    }

    /// Append a participant. The sequence never shrinks.
    pub fn register_participant(&mut self, participant: Participant) {
        self.participants.push(participant);
        self.updated_at = Utc::now();
    }

    /// Replace the participant list with a longer one read back from storage.
    ///
    /// Shorter lists are ignored so the sequence only grows.
    pub fn merge_participants(&mut self, participants: &[Participant]) {
        if participants.len() > self.participants.len() {
            self.participants = participants.to_vec();
        }
    }

    /// Move to `next`, rejecting backward transitions.
    pub fn transition_to(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinatorError::InvalidTransition {
                trans_id: self.trans_id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to `Failure` and keep the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition_to(TransactionStatus::Failure)?;
        self.error_message = Some(reason.into());
        Ok(())
    }

    /// Token identifying this record with the given role.
    pub fn token(&self, role: TransactionRole) -> PropagationToken {
        PropagationToken::new(self.trans_id.clone(), role)
    }
}

/// Kind of repository mutation carried by a [`CoordinatorAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Save,
    Update,
    /// Narrow write of the participant list only.
    UpdateParticipants,
    Delete,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Update => "update",
            Self::UpdateParticipants => "update_participants",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Command envelope placed on the coordinator log.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorAction {
    pub kind: ActionKind,
    pub record: TransactionRecord,
}

impl CoordinatorAction {
    pub fn new(kind: ActionKind, record: TransactionRecord) -> Self {
        Self { kind, record }
    }

    pub fn save(record: TransactionRecord) -> Self {
        Self::new(ActionKind::Save, record)
    }

    pub fn update(record: TransactionRecord) -> Self {
        Self::new(ActionKind::Update, record)
    }

    pub fn update_participants(record: TransactionRecord) -> Self {
        Self::new(ActionKind::UpdateParticipants, record)
    }

    pub fn delete(record: TransactionRecord) -> Self {
        Self::new(ActionKind::Delete, record)
    }

    pub fn trans_id(&self) -> &TransId {
        &self.record.trans_id
    }
}

/// The only state that crosses a service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationToken {
    pub trans_id: TransId,
    pub role: TransactionRole,
}

impl PropagationToken {
    pub fn new(trans_id: TransId, role: TransactionRole) -> Self {
        Self { trans_id, role }
    }
}

/// Wire form of one participant's compensation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationMessage {
    pub trans_id: TransId,
    pub invocation: CompensationInvocation,
}

impl CompensationMessage {
    pub fn new(trans_id: TransId, invocation: CompensationInvocation) -> Self {
        Self {
            trans_id,
            invocation,
        }
    }
}

impl From<&Participant> for CompensationMessage {
    fn from(participant: &Participant) -> Self {
        Self::new(participant.trans_id.clone(), participant.invocation.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn participant(id: &TransId, n: u32) -> Participant {
        Participant::new(
            id.clone(),
            "inventory",
            format!("release-{}", n),
            CompensationInvocation::new("inventory.release").with_arg(json!(n)),
        )
    }

    #[test]
    fn test_trans_id_is_unique() {
        assert_ne!(TransId::new(), TransId::new());
        assert_eq!(TransId::from("abc").as_str(), "abc");
    }

    #[test]
    fn test_status_transitions_forward_only() {
        use TransactionStatus::*;
        assert!(Begin.can_transition_to(Commit));
        assert!(Begin.can_transition_to(Failure));
        assert!(Commit.can_transition_to(Commit));
        assert!(!Commit.can_transition_to(Begin));
        assert!(!Failure.can_transition_to(Commit));
        assert!(!Commit.can_transition_to(Failure));
    }

    #[test]
    fn test_record_transition_rejects_backwards() {
        let mut record = TransactionRecord::start(TargetDescriptor::new("orders", "place"));
        record.transition_to(TransactionStatus::Commit).unwrap();
        let err = record.transition_to(TransactionStatus::Begin).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidTransition { .. }));
        assert_eq!(record.status, TransactionStatus::Commit);
    }

    #[test]
    fn test_mark_failed_keeps_reason() {
        let mut record = TransactionRecord::start(TargetDescriptor::new("orders", "place"));
        record.mark_failed("stock exhausted").unwrap();
        assert_eq!(record.status, TransactionStatus::Failure);
        assert_eq!(record.error_message.as_deref(), Some("stock exhausted"));
    }

    #[test]
    fn test_start_record_defaults() {
        let record = TransactionRecord::start(TargetDescriptor::new("orders", "place"));
        assert_eq!(record.status, TransactionStatus::Begin);
        assert_eq!(record.role, TransactionRole::Start);
        assert!(!record.has_participants());
        assert_eq!(record.target.to_string(), "orders::place");
    }

    #[test]
    fn test_participants_append_in_order() {
        let mut record = TransactionRecord::start(TargetDescriptor::default());
        let id = record.trans_id.clone();
        for n in 0..3 {
            record.register_participant(participant(&id, n));
        }
        let patterns: Vec<_> = record.participants().iter().map(|p| p.pattern.as_str()).collect();
        assert_eq!(patterns, vec!["release-0", "release-1", "release-2"]);
    }

    #[test]
    fn test_merge_participants_never_shrinks() {
        let mut record = TransactionRecord::start(TargetDescriptor::default());
        let id = record.trans_id.clone();
        record.register_participant(participant(&id, 0));
        record.register_participant(participant(&id, 1));
        record.merge_participants(&[participant(&id, 9)]);
        assert_eq!(record.participants().len(), 2);
    }

    #[test]
    fn test_status_and_role_parse() {
        assert_eq!("COMMIT".parse::<TransactionStatus>().unwrap(), TransactionStatus::Commit);
        assert_eq!("provider".parse::<TransactionRole>().unwrap(), TransactionRole::Provider);
        assert!("rollback".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_tag() {
        let encoded = serde_json::to_string(&TransactionStatus::Failure).unwrap();
        assert_eq!(encoded, "\"failure\"");
    }

    #[test]
    fn test_message_from_participant() {
        let id = TransId::from("t-42");
        let p = participant(&id, 7);
        let message = CompensationMessage::from(&p);
        assert_eq!(message.trans_id, id);
        assert_eq!(message.invocation.args, vec![json!(7)]);
    }
}
