//! Identifier and sequence types.

use crate::{define_id, IdError};

// =============================================================================
// Relay instance
// =============================================================================

define_id!(RelayId, "rly");

// =============================================================================
// Inbound requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Publish sequence
// =============================================================================

/// Position of an envelope in one relay instance's publish order.
///
/// Only meaningful together with the [`RelayId`] that assigned it; it is a
/// diagnostic aid, not a global order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublishSeq(u64);

impl PublishSeq {
    /// The first sequence number handed out by a fresh relay instance.
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl Default for PublishSeq {
    fn default() -> Self {
        Self::FIRST
    }
}

impl std::fmt::Display for PublishSeq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for PublishSeq {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for PublishSeq {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Self)
    }
}

// =============================================================================
// Document ID
// =============================================================================

/// Identifier of a watched document.
///
/// The value comes from the wildcard segment of a concrete collection path,
/// so it can never contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn parse(s: impl Into<String>) -> Result<Self, IdError> {
        let s = s.into();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.contains('/') {
            return Err(IdError::InvalidDocumentId {
                id: s,
                reason: "contains a path separator",
            });
        }
        if s.trim() != s {
            return Err(IdError::InvalidDocumentId {
                id: s,
                reason: "has leading or trailing whitespace",
            });
        }
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for DocumentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for DocumentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for DocumentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
