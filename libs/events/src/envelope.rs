//! Envelope - the canonical message published for every relayed change.

use chrono::{DateTime, Utc};
use docrelay_id::{DocumentId, PublishSeq, RelayId};
use serde::{Deserialize, Serialize};

use crate::{BusMessage, EventError, EventKind, LabelMetadata};

/// The canonical, published form of a change event.
///
/// Fields are private: once built, an envelope is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the envelope is published to.
    topic: String,

    /// Relay instance that assigned `publish_sequence`.
    relay_id: RelayId,

    /// Monotonic within `relay_id`.
    publish_sequence: PublishSeq,

    document_id: DocumentId,

    /// Concrete path of the changed document.
    collection_path: String,

    event_kind: EventKind,

    /// Copied verbatim from the matching registration.
    label_metadata: LabelMetadata,

    /// The document after the change.
    payload: serde_json::Value,

    /// The document before the change, when the source supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before: Option<serde_json::Value>,

    occurred_at: DateTime<Utc>,
}

impl Envelope {
    /// Creates a new envelope builder.
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn relay_id(&self) -> RelayId {
        self.relay_id
    }

    pub fn publish_sequence(&self) -> PublishSeq {
        self.publish_sequence
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn collection_path(&self) -> &str {
        &self.collection_path
    }

    pub fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    pub fn label_metadata(&self) -> &LabelMetadata {
        &self.label_metadata
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn before(&self) -> Option<&serde_json::Value> {
        self.before.as_ref()
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Encodes the envelope for the bus.
    ///
    /// The JSON body keeps the envelope's field names; attributes carry the
    /// label metadata so subscribers can dispatch without decoding `data`.
    pub fn to_message(&self) -> Result<BusMessage, EventError> {
        Ok(BusMessage {
            data: serde_json::to_vec(self)?,
            attributes: self.label_metadata.clone(),
            ordering_key: Some(self.document_id.to_string()),
        })
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Default)]
pub struct EnvelopeBuilder {
    topic: Option<String>,
    relay_id: Option<RelayId>,
    publish_sequence: Option<PublishSeq>,
    document_id: Option<DocumentId>,
    collection_path: Option<String>,
    event_kind: Option<EventKind>,
    label_metadata: LabelMetadata,
    payload: Option<serde_json::Value>,
    before: Option<serde_json::Value>,
    occurred_at: Option<DateTime<Utc>>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn sequence(mut self, relay_id: RelayId, seq: PublishSeq) -> Self {
        self.relay_id = Some(relay_id);
        self.publish_sequence = Some(seq);
        self
    }

    pub fn document(mut self, collection_path: impl Into<String>, id: DocumentId) -> Self {
        self.collection_path = Some(collection_path.into());
        self.document_id = Some(id);
        self
    }

    pub fn event_kind(mut self, kind: EventKind) -> Self {
        self.event_kind = Some(kind);
        self
    }

    pub fn label_metadata(mut self, labels: LabelMetadata) -> Self {
        self.label_metadata = labels;
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn before(mut self, before: Option<serde_json::Value>) -> Self {
        self.before = before;
        self
    }

    pub fn occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }

    /// Builds the envelope.
    ///
    /// `occurred_at` defaults to now and `label_metadata` to empty; every
    /// other field is required.
    pub fn build(self) -> Result<Envelope, EventError> {
        Ok(Envelope {
            topic: self.topic.ok_or(EventError::MissingField("topic"))?,
            relay_id: self.relay_id.ok_or(EventError::MissingField("relay_id"))?,
            publish_sequence: self
                .publish_sequence
                .ok_or(EventError::MissingField("publish_sequence"))?,
            document_id: self
                .document_id
                .ok_or(EventError::MissingField("document_id"))?,
            collection_path: self
                .collection_path
                .ok_or(EventError::MissingField("collection_path"))?,
            event_kind: self
                .event_kind
                .ok_or(EventError::MissingField("event_kind"))?,
            label_metadata: self.label_metadata,
            payload: self.payload.ok_or(EventError::MissingField("payload"))?,
            before: self.before,
            occurred_at: self.occurred_at.unwrap_or_else(Utc::now),
        })
    }
}
