//! Bus-facing message form of an envelope.

use serde::{Deserialize, Serialize};

use crate::{Envelope, EventError, LabelMetadata};

/// A message as handed to the message bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    /// JSON-encoded [`Envelope`].
    pub data: Vec<u8>,

    /// Message attributes; the envelope's label metadata.
    pub attributes: LabelMetadata,

    /// Bus-side ordering hint; the document ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<String>,
}

impl BusMessage {
    /// Decodes the envelope carried in `data`.
    pub fn decode_envelope(&self) -> Result<Envelope, EventError> {
        Ok(serde_json::from_slice(&self.data)?)
    }

    /// Size of the encoded body in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
