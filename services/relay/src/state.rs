//! Application state shared across request handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::relay::Relay;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    relay: Arc<Relay>,
    draining: AtomicBool,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                relay,
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    /// Owned handle for work that outlives a request, such as shutdown.
    pub fn relay_handle(&self) -> Arc<Relay> {
        Arc::clone(&self.inner.relay)
    }

    /// Marks the service as draining; new events are refused from here on.
    pub fn begin_shutdown(&self) {
        self.inner.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst) || self.inner.relay.is_shutting_down()
    }
}
