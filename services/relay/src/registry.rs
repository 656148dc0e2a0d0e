//! Watch registry.
//!
//! Holds the set of watched collection patterns and resolves the concrete
//! path of a changed document to its registration.
//!
//! - A pattern is an absolute path with exactly one `{name}` segment standing
//!   for the document ID, e.g. `/entries/{entryId}`
//! - Patterns are compared with the wildcard name erased, so `/entries/{id}`
//!   and `/entries/{entryId}` collide
//! - Reads go through an atomically swapped snapshot and never block

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use docrelay_events::{EventKind, EventKinds, LabelMetadata};
use docrelay_id::{DocumentId, IdError};
use thiserror::Error;
use tracing::{debug, info};

/// Placeholder for the wildcard segment in lookup keys.
const WILDCARD_KEY: &str = "*";

/// Registry errors. None of them are retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid collection pattern '{pattern}': {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("invalid event kinds for '{pattern}': {reason}")]
    InvalidEventKinds {
        pattern: String,
        reason: &'static str,
    },

    #[error("collection path '{pattern}' is already registered as '{existing}'")]
    DuplicatePath { pattern: String, existing: String },

    #[error("no registration matches path '{0}'")]
    UnknownPath(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard(String),
}

/// A parsed collection path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPattern {
    raw: String,
    segments: Vec<Segment>,
    wildcard: usize,
}

impl CollectionPattern {
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let invalid = |reason| RegistryError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        let parts = split_path(raw).ok_or_else(|| invalid("must be an absolute path without empty segments"))?;

        let mut segments = Vec::with_capacity(parts.len());
        let mut wildcard = None;

        for (idx, part) in parts.into_iter().enumerate() {
            if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() || name.contains(['{', '}']) {
                    return Err(invalid("wildcard segment needs a name, e.g. {id}"));
                }
                if wildcard.replace(idx).is_some() {
                    return Err(invalid("only one wildcard segment is allowed"));
                }
                segments.push(Segment::Wildcard(name.to_string()));
            } else {
                if part == WILDCARD_KEY || part.contains(['{', '}']) {
                    return Err(invalid("literal segments may not contain '*', '{' or '}'"));
                }
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        let wildcard = wildcard.ok_or_else(|| invalid("a wildcard segment for the document ID is required"))?;

        Ok(Self {
            raw: raw.to_string(),
            segments,
            wildcard,
        })
    }

    /// The pattern as written in configuration.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Name given to the wildcard segment (`entryId` in `/entries/{entryId}`).
    pub fn wildcard_name(&self) -> &str {
        match &self.segments[self.wildcard] {
            Segment::Wildcard(name) => name,
            Segment::Literal(_) => unreachable!("wildcard index always points at a wildcard"),
        }
    }

    /// Lookup key with the wildcard name erased, e.g. `/entries/*`.
    fn key(&self) -> String {
        let parts = self.segments.iter().map(|s| match s {
            Segment::Literal(l) => l.as_str(),
            Segment::Wildcard(_) => WILDCARD_KEY,
        });
        join_key(parts)
    }

    /// Returns the document segment if `path` matches this pattern.
    pub fn match_path<'p>(&self, path: &'p str) -> Option<&'p str> {
        let parts = split_path(path)?;
        if parts.len() != self.segments.len() {
            return None;
        }

        for (segment, part) in self.segments.iter().zip(&parts) {
            if let Segment::Literal(literal) = segment {
                if literal != part {
                    return None;
                }
            }
        }

        Some(parts[self.wildcard])
    }
}

impl std::fmt::Display for CollectionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits an absolute path into segments; `None` on relative paths or
/// empty segments.
fn split_path(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix('/')?;
    let parts: Vec<&str> = rest.split('/').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts)
}

fn join_key<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let mut key = String::new();
    for part in parts {
        key.push('/');
        key.push_str(part);
    }
    key
}

/// One watched collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pattern: CollectionPattern,
    event_kinds: EventKinds,
    label_metadata: LabelMetadata,
}

impl Registration {
    pub fn new(
        pattern: CollectionPattern,
        event_kinds: EventKinds,
        label_metadata: LabelMetadata,
    ) -> Result<Self, RegistryError> {
        if event_kinds.is_empty() {
            return Err(RegistryError::InvalidEventKinds {
                pattern: pattern.raw,
                reason: "at least one event kind is required",
            });
        }
        if event_kinds.iter().any(|k| !k.is_relayable()) {
            return Err(RegistryError::InvalidEventKinds {
                pattern: pattern.raw,
                reason: "only created and updated can be watched",
            });
        }

        Ok(Self {
            pattern,
            event_kinds,
            label_metadata,
        })
    }

    pub fn pattern(&self) -> &CollectionPattern {
        &self.pattern
    }

    pub fn event_kinds(&self) -> &EventKinds {
        &self.event_kinds
    }

    pub fn label_metadata(&self) -> &LabelMetadata {
        &self.label_metadata
    }

    /// Returns true if changes of `kind` are relayed for this collection.
    pub fn watches(&self, kind: EventKind) -> bool {
        self.event_kinds.contains(&kind)
    }

    /// Extracts the document ID from a concrete path under this registration.
    ///
    /// `None` if the path does not match; an error if it matches but the
    /// document segment is not a valid ID.
    pub fn document_id(&self, path: &str) -> Option<Result<DocumentId, IdError>> {
        self.pattern.match_path(path).map(DocumentId::parse)
    }
}

/// Immutable registry contents for lock-free reads.
#[derive(Debug, Default)]
struct RegistrySnapshot {
    by_key: HashMap<String, Arc<Registration>>,
    ordered: Vec<Arc<Registration>>,
}

impl RegistrySnapshot {
    fn with_added(&self, key: String, registration: Arc<Registration>) -> Self {
        let mut by_key = self.by_key.clone();
        let mut ordered = self.ordered.clone();
        by_key.insert(key, Arc::clone(&registration));
        ordered.push(registration);
        Self { by_key, ordered }
    }
}

/// Registry of watched collections.
///
/// Writers serialize on a mutex and swap in a new snapshot; readers load the
/// current snapshot without locking.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a collection.
    ///
    /// Fails with [`RegistryError::DuplicatePath`] if the pattern (wildcard
    /// name aside) is already registered; the registry is unchanged on error.
    pub fn register(
        &self,
        collection_path: &str,
        event_kinds: EventKinds,
        label_metadata: LabelMetadata,
    ) -> Result<Arc<Registration>, RegistryError> {
        let pattern = CollectionPattern::parse(collection_path)?;
        let registration = Arc::new(Registration::new(pattern, event_kinds, label_metadata)?);
        let key = registration.pattern.key();

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.snapshot.load();
        if let Some(existing) = current.by_key.get(&key) {
            return Err(RegistryError::DuplicatePath {
                pattern: collection_path.to_string(),
                existing: existing.pattern.raw.clone(),
            });
        }

        self.snapshot
            .store(Arc::new(current.with_added(key, Arc::clone(&registration))));

        info!(
            pattern = %registration.pattern,
            event_kinds = ?registration.event_kinds,
            labels = ?registration.label_metadata,
            "collection registered"
        );

        Ok(registration)
    }

    /// Resolves the concrete path of a changed document.
    pub fn resolve(&self, collection_path: &str) -> Result<Arc<Registration>, RegistryError> {
        let unknown = || RegistryError::UnknownPath(collection_path.to_string());
        let parts = split_path(collection_path).ok_or_else(unknown)?;
        let snapshot = self.snapshot.load();

        for wildcard in 0..parts.len() {
            let key = join_key(parts.iter().enumerate().map(|(idx, part)| {
                if idx == wildcard {
                    WILDCARD_KEY
                } else {
                    part
                }
            }));

            if let Some(registration) = snapshot.by_key.get(&key) {
                debug!(path = collection_path, pattern = %registration.pattern, "path resolved");
                return Ok(Arc::clone(registration));
            }
        }

        Err(unknown())
    }

    /// All registrations in registration order.
    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        self.snapshot.load().ordered.clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
