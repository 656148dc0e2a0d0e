//! Bus that only logs. Used when running without a real bus.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use docrelay_events::BusMessage;
use tracing::info;

use super::{Ack, BusError, MessageBus};

#[derive(Debug, Default)]
pub struct LogBus {
    published: AtomicU64,
}

impl LogBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBus for LogBus {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, topic: &str, message: &BusMessage) -> Result<Ack, BusError> {
        let n = self.published.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            topic,
            attributes = ?message.attributes,
            ordering_key = message.ordering_key.as_deref().unwrap_or(""),
            bytes = message.len(),
            data = %String::from_utf8_lossy(&message.data),
            "message published (log bus)"
        );
        Ok(Ack {
            message_id: format!("log-{n}"),
        })
    }
}
