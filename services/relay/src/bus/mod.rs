//! Message bus clients.
//!
//! The pipeline talks to the bus through [`MessageBus`] only. Each call is a
//! single publish attempt; retries belong to the pipeline.

mod log;
mod pubsub;

use async_trait::async_trait;
use docrelay_events::BusMessage;
use serde::Serialize;
use thiserror::Error;

pub use self::log::LogBus;
pub use self::pubsub::{BearerToken, PubSubConfig, PubSubHttpBus};

/// Acknowledgement returned by the bus for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Bus-assigned message ID.
    pub message_id: String,
}

/// Failure of a single publish attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Network error or bus unavailable. Retryable.
    #[error("bus unavailable: {0}")]
    Unavailable(String),

    /// The attempt exceeded its timeout. Retryable.
    #[error("publish attempt timed out")]
    Timeout,

    /// The bus refused the message; retrying will not help.
    #[error("bus rejected message: {0}")]
    Rejected(String),
}

impl BusError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Unavailable(_) | BusError::Timeout)
    }
}

/// A publish-subscribe sink.
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Bus name for logging.
    fn name(&self) -> &str;

    /// Makes one attempt to publish `message` to `topic`.
    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<Ack, BusError>;
}

#[async_trait]
impl<B: MessageBus + ?Sized> MessageBus for std::sync::Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<Ack, BusError> {
        (**self).publish(topic, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BusError::Unavailable("connection reset".into()).is_transient());
        assert!(BusError::Timeout.is_transient());
        assert!(!BusError::Rejected("403".into()).is_transient());
    }
}
