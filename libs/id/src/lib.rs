//! # docrelay-id
//!
//! Identifier types shared by the relay crates.
//!
//! ## Kinds of identifiers
//!
//! - [`RelayId`]: one per running relay instance, `rly_{ulid}`. Envelopes carry
//!   it so that `(relay_id, publish_sequence)` names a single publish.
//! - [`RequestId`]: correlates an inbound API request with its logs and
//!   error responses, `req_{ulid}`.
//! - [`PublishSeq`]: the per-instance monotonic publish counter.
//! - [`DocumentId`]: the identifier of a watched document, as taken from the
//!   wildcard segment of its collection path. Opaque to the relay apart from
//!   basic shape checks.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
