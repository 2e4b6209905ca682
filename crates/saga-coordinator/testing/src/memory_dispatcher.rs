//! In-memory implementation of MessageDispatcher for testing.

use async_trait::async_trait;
use parking_lot::RwLock;
use saga_coordinator_core::codec::MessageCodec;
use saga_coordinator_core::model::CompensationMessage;
use saga_coordinator_core::port::MessageDispatcher;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Errors produced by [`InMemoryMessageDispatcher`].
#[derive(Debug, thiserror::Error)]
pub enum InMemoryDispatcherError {
    #[error("Publish to '{destination}' rejected (attempt {attempt})")]
    Rejected { destination: String, attempt: usize },
}

/// A message accepted by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub destination: String,
    pub pattern: String,
    pub payload: Vec<u8>,
}

/// Records every publish and fails on demand.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMessageDispatcher {
    inner: Arc<InnerDispatcher>,
}

#[derive(Debug, Default)]
struct InnerDispatcher {
    sent: RwLock<Vec<SentMessage>>,
    attempts: AtomicUsize,
    failing_destinations: RwLock<HashSet<String>>,
    /// 1-based attempt number that fails; 0 disables.
    fail_on_attempt: AtomicUsize,
}

impl InMemoryMessageDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every publish to `destination`.
    pub fn fail_destination(&self, destination: impl Into<String>) {
        self.inner
            .failing_destinations
            .write()
            .insert(destination.into());
    }

    /// Reject the `n`th publish attempt (1-based) from now on.
    pub fn fail_on_attempt(&self, n: usize) {
        self.inner.fail_on_attempt.store(n, Ordering::SeqCst);
    }

    /// Remove all injected failures.
    pub fn heal(&self) {
        self.inner.failing_destinations.write().clear();
        self.inner.fail_on_attempt.store(0, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.inner.sent.read().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.inner.sent.read().len()
    }

    /// Publish attempts, including rejected ones.
    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Decode every accepted payload.
    pub fn decode_all(&self, codec: &dyn MessageCodec) -> Vec<CompensationMessage> {
        self.inner
            .sent
            .read()
            .iter()
            .filter_map(|m| codec.decode_message(&m.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.sent.write().clear();
        self.inner.attempts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageDispatcher for InMemoryMessageDispatcher {
    type Error = InMemoryDispatcherError;

    async fn send(&self, destination: &str, pattern: &str, payload: &[u8]) -> Result<(), Self::Error> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.inner.fail_on_attempt.load(Ordering::SeqCst) == attempt
            || self.inner.failing_destinations.read().contains(destination)
        {
            return Err(InMemoryDispatcherError::Rejected {
                destination: destination.to_string(),
                attempt,
            });
        }

        self.inner.sent.write().push(SentMessage {
            destination: destination.to_string(),
            pattern: pattern.to_string(),
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_sends() {
        let dispatcher = InMemoryMessageDispatcher::new();
        dispatcher.send("inventory", "release", b"a").await.unwrap();
        dispatcher.send("payments", "refund", b"b").await.unwrap();

        let sent = dispatcher.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].destination, "payments");
        assert_eq!(dispatcher.attempts(), 2);
    }

    #[tokio::test]
    async fn test_fail_on_attempt() {
        let dispatcher = InMemoryMessageDispatcher::new();
        dispatcher.fail_on_attempt(2);

        assert!(dispatcher.send("a", "p", b"1").await.is_ok());
        assert!(dispatcher.send("b", "p", b"2").await.is_err());
        assert!(dispatcher.send("c", "p", b"3").await.is_ok());
        assert_eq!(dispatcher.sent_count(), 2);
        assert_eq!(dispatcher.attempts(), 3);
    }

    #[tokio::test]
    async fn test_fail_destination_until_healed() {
        let dispatcher = InMemoryMessageDispatcher::new();
        dispatcher.fail_destination("inventory");
        assert!(dispatcher.send("inventory", "p", b"x").await.is_err());

        dispatcher.heal();
        assert!(dispatcher.send("inventory", "p", b"x").await.is_ok());
    }
}
