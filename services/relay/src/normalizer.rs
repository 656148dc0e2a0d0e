//! Event normalizer.
//!
//! Turns a change event plus its registration into an [`Envelope`]. Apart
//! from advancing the publish counter this is a pure function: no I/O, no
//! blocking, and payloads pass through untouched.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use docrelay_events::{ChangeEvent, Envelope, EventError, EventKind};
use docrelay_id::{IdError, PublishSeq, RelayId};
use thiserror::Error;

use crate::registry::Registration;

/// Why an event could not be turned into an envelope.
///
/// Retrying does not change the shape of an event, so none of these are
/// retryable; the event is reported and dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("{kind} event for '{path}' has no after-state")]
    MissingPayload { path: String, kind: EventKind },

    #[error("{kind} events are not relayed (path '{path}')")]
    UnsupportedEventKind { path: String, kind: EventKind },

    #[error("path '{path}' does not match registration '{pattern}'")]
    PathMismatch { path: String, pattern: String },

    #[error("path '{path}' names an invalid document: {source}")]
    InvalidDocumentId { path: String, source: IdError },

    #[error("failed to build envelope: {0}")]
    Envelope(#[from] EventError),
}

/// Builds envelopes for one relay instance.
#[derive(Debug)]
pub struct Normalizer {
    topic: String,
    relay_id: RelayId,
    next_seq: AtomicU64,
}

impl Normalizer {
    pub fn new(topic: impl Into<String>, relay_id: RelayId) -> Self {
        Self {
            topic: topic.into(),
            relay_id,
            next_seq: AtomicU64::new(PublishSeq::FIRST.value()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn relay_id(&self) -> RelayId {
        self.relay_id
    }

    /// Normalizes `event` under `registration`.
    ///
    /// A sequence number is only consumed when an envelope is produced, so
    /// rejected events leave no gaps.
    pub fn normalize(
        &self,
        event: &ChangeEvent,
        registration: &Registration,
    ) -> Result<Envelope, NormalizeError> {
        let path = &event.collection_path;

        if !event.event_kind.is_relayable() {
            return Err(NormalizeError::UnsupportedEventKind {
                path: path.clone(),
                kind: event.event_kind,
            });
        }

        let payload = match &event.after {
            Some(after) if !after.is_null() => after.clone(),
            _ => {
                return Err(NormalizeError::MissingPayload {
                    path: path.clone(),
                    kind: event.event_kind,
                })
            }
        };

        let document_id = match &event.document_id {
            Some(id) if registration.pattern().match_path(path).is_some() => id.clone(),
            _ => match registration.document_id(path) {
                Some(Ok(id)) => id,
                Some(Err(source)) => {
                    return Err(NormalizeError::InvalidDocumentId {
                        path: path.clone(),
                        source,
                    })
                }
                None => {
                    return Err(NormalizeError::PathMismatch {
                        path: path.clone(),
                        pattern: registration.pattern().to_string(),
                    })
                }
            },
        };

        let seq = PublishSeq::new(self.next_seq.fetch_add(1, Ordering::SeqCst));

        let envelope = Envelope::builder()
            .topic(self.topic.as_str())
            .sequence(self.relay_id, seq)
            .document(path.as_str(), document_id)
            .event_kind(event.event_kind)
            .label_metadata(registration.label_metadata().clone())
            .payload(payload)
            .before(event.before.clone().filter(|b| !b.is_null()))
            .occurred_at(event.occurred_at.unwrap_or_else(Utc::now))
            .build()?;

        Ok(envelope)
    }
}
