//! MessageDispatcher port for the message bus.
//!
//! This module defines the [`MessageDispatcher`] trait used to publish
//! encoded compensation messages to participants.

use async_trait::async_trait;

/// Publishes a compensation payload to a named destination.
///
/// Delivery is at-least-once: the coordinator may publish the same payload
/// more than once and consumers suppress duplicates.
#[async_trait]
pub trait MessageDispatcher: Send + Sync + 'static {
    /// The error type for this implementation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Publish `payload` to `destination` using the routing `pattern`.
    async fn send(&self, destination: &str, pattern: &str, payload: &[u8])
    -> Result<(), Self::Error>;
}
