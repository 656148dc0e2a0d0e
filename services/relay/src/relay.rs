//! Relay driver: registry, then normalizer, then pipeline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use docrelay_events::{ChangeEvent, EventKind};
use docrelay_id::{DocumentId, PublishSeq};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::bus::Ack;
use crate::normalizer::{NormalizeError, Normalizer};
use crate::pipeline::{PipelineStats, PublishError, PublishPipeline};
use crate::registry::{RegistryError, WatchRegistry};

/// Outcome of handling one change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The envelope was acknowledged by the bus.
    Published {
        ack: Ack,
        document_id: DocumentId,
        publish_sequence: PublishSeq,
    },

    /// The collection is watched, but not for this kind of change.
    Filtered { pattern: String, kind: EventKind },
}

/// What the event source should do with a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Report and drop. Redelivering the same event fails the same way.
    Drop,
    /// Deliver the event again later.
    Redeliver,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl RelayError {
    pub fn disposition(&self) -> Disposition {
        match self {
            RelayError::Publish(e) if e.is_redeliverable() => Disposition::Redeliver,
            _ => Disposition::Drop,
        }
    }
}

/// Relays change events for one topic.
#[derive(Debug)]
pub struct Relay {
    registry: Arc<WatchRegistry>,
    normalizer: Normalizer,
    pipeline: PublishPipeline,
    // Held across normalize + submit so per-document publish order matches
    // sequence order.
    submit_lock: Mutex<()>,
}

impl Relay {
    pub fn new(
        registry: Arc<WatchRegistry>,
        normalizer: Normalizer,
        pipeline: PublishPipeline,
    ) -> Self {
        Self {
            registry,
            normalizer,
            pipeline,
            submit_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn topic(&self) -> &str {
        self.normalizer.topic()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.pipeline.is_closing()
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Handles one change event end to end.
    #[instrument(
        skip_all,
        fields(path = %event.collection_path, kind = %event.event_kind)
    )]
    pub async fn handle(&self, event: ChangeEvent) -> Result<Delivery, RelayError> {
        let registration = self.registry.resolve(&event.collection_path).map_err(|e| {
            warn!(error = %e, "event for unwatched collection");
            e
        })?;

        if event.event_kind.is_relayable() && !registration.watches(event.event_kind) {
            info!(pattern = %registration.pattern(), "event kind not watched, skipping");
            return Ok(Delivery::Filtered {
                pattern: registration.pattern().to_string(),
                kind: event.event_kind,
            });
        }

        let ticket = {
            let _guard = self
                .submit_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let envelope = self.normalizer.normalize(&event, &registration).map_err(|e| {
                warn!(error = %e, "event dropped");
                e
            })?;
            self.pipeline.submit(envelope)
        };

        let document_id = ticket.document_id().clone();
        let publish_sequence = ticket.sequence();
        let ack = ticket.await?;

        Ok(Delivery::Published {
            ack,
            document_id,
            publish_sequence,
        })
    }

    /// Stops accepting events and drains the pipeline within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.pipeline.shutdown(grace).await;
        let stats = self.pipeline.stats();
        info!(
            submitted = stats.submitted,
            acked = stats.acked,
            exhausted = stats.exhausted,
            abandoned = stats.abandoned,
            "relay stopped"
        );
    }
}
