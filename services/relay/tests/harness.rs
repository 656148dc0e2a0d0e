//! Test harness for relay integration tests.
//!
//! Provides a scripted in-memory bus that records what it publishes and how
//! many publishes overlap, plus helpers to build envelopes and relays.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docrelay_events::{BusMessage, Envelope, EventKind, EventKinds, LabelMetadata};
use docrelay_id::{DocumentId, PublishSeq, RelayId};
use docrelay_relay::bus::{Ack, BusError, MessageBus};
use docrelay_relay::normalizer::Normalizer;
use docrelay_relay::pipeline::PublishPipeline;
use docrelay_relay::registry::WatchRegistry;
use docrelay_relay::relay::Relay;
use docrelay_retry::{BackoffPolicy, RetryPolicy};
use serde_json::json;

/// A message the bus accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub document_id: String,
    pub sequence: u64,
    pub attributes: LabelMetadata,
}

/// In-memory bus with per-document failure scripts.
#[derive(Debug, Default)]
pub struct ScriptedBus {
    delay: Duration,
    failures: Mutex<HashMap<String, VecDeque<BusError>>>,
    published: Mutex<Vec<Published>>,
    attempts: AtomicU64,
    in_flight: Mutex<HashMap<String, usize>>,
    in_flight_total: AtomicUsize,
    max_per_document: AtomicUsize,
    max_total: AtomicUsize,
}

impl ScriptedBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every attempt takes `delay` before it settles.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// The next attempts for `document_id` fail with `errors`, in order.
    pub fn fail(&self, document_id: &str, errors: impl IntoIterator<Item = BusError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(document_id.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    /// Sequences published for one document, in publish order.
    pub fn sequences_for(&self, document_id: &str) -> Vec<u64> {
        self.published()
            .into_iter()
            .filter(|p| p.document_id == document_id)
            .map(|p| p.sequence)
            .collect()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping attempts seen for any single document.
    pub fn max_in_flight_per_document(&self) -> usize {
        self.max_per_document.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping attempts seen overall.
    pub fn max_in_flight_total(&self) -> usize {
        self.max_total.load(Ordering::SeqCst)
    }

    fn enter(&self, document_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(document_id.to_string()).or_default();
        *count += 1;
        self.max_per_document.fetch_max(*count, Ordering::SeqCst);
        let total = self.in_flight_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_total.fetch_max(total, Ordering::SeqCst);
    }

    fn leave(&self, document_id: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(document_id) {
            *count -= 1;
        }
        self.in_flight_total.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for ScriptedBus {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn publish(&self, _topic: &str, message: &BusMessage) -> Result<Ack, BusError> {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = message.decode_envelope().expect("pipeline sent a valid envelope");
        let document_id = envelope.document_id().to_string();

        self.enter(&document_id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&document_id)
            .and_then(|queue| queue.pop_front());
        self.leave(&document_id);

        if let Some(err) = scripted {
            return Err(err);
        }

        self.published.lock().unwrap().push(Published {
            document_id,
            sequence: envelope.publish_sequence().value(),
            attributes: message.attributes.clone(),
        });
        Ok(Ack {
            message_id: format!("msg-{n}"),
        })
    }
}

/// Retry policy without jitter so waits are exact under a paused clock.
pub fn policy(max_retries: u32, max_total_wait: Duration) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        max_total_wait,
        attempt_timeout: Duration::from_secs(1),
        backoff: BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(2),
            jitter: 0.0,
        },
    }
}

pub fn envelope(document_id: &str, seq: u64) -> Envelope {
    Envelope::builder()
        .topic("FirestoreEvents")
        .sequence(RelayId::new(), PublishSeq::new(seq))
        .document(
            format!("/entries/{document_id}"),
            DocumentId::parse(document_id).unwrap(),
        )
        .event_kind(EventKind::Created)
        .label_metadata(LabelMetadata::from([(
            "type".to_string(),
            "entries".to_string(),
        )]))
        .payload(json!({"seq": seq}))
        .build()
        .unwrap()
}

/// Relay watching `/entries/{entryId}` (on create) and
/// `/entry_responses/{entryId}` (on write).
pub fn relay(bus: Arc<ScriptedBus>, policy: RetryPolicy) -> Arc<Relay> {
    let registry = WatchRegistry::new();
    registry
        .register(
            "/entries/{entryId}",
            EventKinds::from([EventKind::Created]),
            LabelMetadata::from([("type".to_string(), "entries".to_string())]),
        )
        .unwrap();
    registry
        .register(
            "/entry_responses/{entryId}",
            EventKinds::from([EventKind::Created, EventKind::Updated]),
            LabelMetadata::from([("type".to_string(), "responses".to_string())]),
        )
        .unwrap();

    Arc::new(Relay::new(
        Arc::new(registry),
        Normalizer::new("FirestoreEvents", RelayId::new()),
        PublishPipeline::new(bus, policy),
    ))
}
