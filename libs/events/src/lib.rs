//! # docrelay-events
//!
//! Data types that flow through the relay.
//!
//! ## Design Principles
//!
//! - A [`ChangeEvent`] is what the document source tells us; it is transient
//! - An [`Envelope`] is what we publish; it is immutable once built
//! - Payloads are opaque JSON and pass through untouched
//! - Label metadata is copied verbatim from the matching registration
//!
//! ## Wire format
//!
//! [`BusMessage`] is the bus-facing form of an envelope: the envelope as JSON
//! in `data`, the label metadata as message attributes, and the document ID
//! as ordering key.

mod envelope;
mod error;
mod message;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use message::BusMessage;
pub use types::*;
