//! docrelay relay service.
//!
//! Receives document change events, resolves them against the watched
//! collections, normalizes them into envelopes and publishes those to a
//! message bus with bounded retries and per-document ordering.
//!
//! ```text
//! HTTP /v1/events -> Relay::handle
//!                      -> WatchRegistry::resolve
//!                      -> Normalizer::normalize
//!                      -> PublishPipeline::submit -> MessageBus::publish
//! ```

pub mod api;
pub mod bus;
pub mod config;
pub mod normalizer;
pub mod pipeline;
pub mod registry;
pub mod relay;
pub mod server;
pub mod state;
