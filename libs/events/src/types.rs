//! Change events as delivered by the document source.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use docrelay_id::DocumentId;
use serde::{Deserialize, Serialize};

use crate::EventError;

/// String labels attached to every envelope produced from a registration
/// (for example `type = "entries"` or `collection = "entries"`).
pub type LabelMetadata = BTreeMap<String, String>;

/// What happened to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    /// Delivered by some sources but never relayed.
    Deleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }

    /// Returns true for the kinds a registration may watch.
    pub fn is_relayable(&self) -> bool {
        matches!(self, EventKind::Created | EventKind::Updated)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(EventKind::Created),
            "updated" => Ok(EventKind::Updated),
            "deleted" => Ok(EventKind::Deleted),
            other => Err(EventError::UnknownEventKind(other.to_string())),
        }
    }
}

/// Set of event kinds a registration watches.
pub type EventKinds = BTreeSet<EventKind>;

/// A single document change notification.
///
/// `collection_path` is the concrete path of the changed document, e.g.
/// `/entries/abc`, never the registration pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection_path: String,

    /// Overrides the ID taken from the path's wildcard segment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,

    pub event_kind: EventKind,

    /// Snapshot before the change. A JSON `null` reads as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,

    /// Snapshot after the change. A JSON `null` reads as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn created(collection_path: impl Into<String>, after: serde_json::Value) -> Self {
        Self {
            collection_path: collection_path.into(),
            document_id: None,
            event_kind: EventKind::Created,
            before: None,
            after: Some(after),
            occurred_at: None,
        }
    }

    pub fn updated(
        collection_path: impl Into<String>,
        before: serde_json::Value,
        after: serde_json::Value,
    ) -> Self {
        Self {
            collection_path: collection_path.into(),
            document_id: None,
            event_kind: EventKind::Updated,
            before: Some(before),
            after: Some(after),
            occurred_at: None,
        }
    }

    pub fn deleted(collection_path: impl Into<String>, before: serde_json::Value) -> Self {
        Self {
            collection_path: collection_path.into(),
            document_id: None,
            event_kind: EventKind::Deleted,
            before: Some(before),
            after: None,
            occurred_at: None,
        }
    }

    pub fn with_document_id(mut self, id: DocumentId) -> Self {
        self.document_id = Some(id);
        self
    }

    pub fn with_occurred_at(mut self, ts: DateTime<Utc>) -> Self {
        self.occurred_at = Some(ts);
        self
    }
}
