//! Publish pipeline.
//!
//! Envelopes are delivered to the bus with bounded retries. Delivery is
//! single-flight per document: each document ID gets a lane, a FIFO queue
//! drained by one worker task, so at most one publish for a document is
//! outstanding and acknowledgements arrive in submission order. Lanes for
//! different documents run concurrently.
//!
//! A lane exists only while it has work. The worker removes it under the
//! table lock once its queue is empty, so a later submission for the same
//! document starts a fresh lane.

mod state;

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use docrelay_events::{Envelope, EventError};
use docrelay_id::{DocumentId, PublishSeq};
use docrelay_retry::{GiveUp, RetryDecision, RetryPolicy};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{Ack, BusError, MessageBus};

pub use self::state::PublishState;

/// Terminal failure of a publish.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Retries ran out, or the bus refused the envelope outright.
    #[error(
        "publish of document '{document_id}' (seq {sequence}) failed after {attempts} attempt(s) in {elapsed:?}: {last_error}"
    )]
    Exhausted {
        document_id: DocumentId,
        sequence: PublishSeq,
        attempts: u32,
        elapsed: Duration,
        last_error: BusError,
    },

    /// The pipeline shut down before the envelope was acknowledged.
    #[error("publish of document '{document_id}' (seq {sequence}) abandoned: pipeline is shutting down")]
    Abandoned {
        document_id: DocumentId,
        sequence: PublishSeq,
    },

    #[error("failed to encode envelope: {0}")]
    Encode(EventError),
}

impl PublishError {
    /// Whether the upstream source should redeliver the event.
    pub fn is_redeliverable(&self) -> bool {
        !matches!(self, PublishError::Encode(_))
    }
}

/// Counters for the lifetime of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub submitted: u64,
    pub acked: u64,
    pub exhausted: u64,
    pub abandoned: u64,
    pub retries: u64,
    /// Documents with queued or in-flight work right now.
    pub active_lanes: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    acked: AtomicU64,
    exhausted: AtomicU64,
    abandoned: AtomicU64,
    retries: AtomicU64,
}

type Reply = oneshot::Sender<Result<Ack, PublishError>>;

struct Job {
    envelope: Envelope,
    reply: Reply,
}

struct Lane {
    queue: VecDeque<Job>,
    worker: Option<AbortHandle>,
}

struct Inner {
    bus: Arc<dyn MessageBus>,
    policy: RetryPolicy,
    lanes: Mutex<HashMap<DocumentId, Lane>>,
    closing: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    counters: Counters,
}

impl Inner {
    fn lanes(&self) -> MutexGuard<'_, HashMap<DocumentId, Lane>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a submitted envelope. Resolves when the publish settles.
#[must_use = "a ticket does nothing unless awaited"]
#[derive(Debug)]
pub struct PublishTicket {
    document_id: DocumentId,
    sequence: PublishSeq,
    rx: oneshot::Receiver<Result<Ack, PublishError>>,
}

impl PublishTicket {
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn sequence(&self) -> PublishSeq {
        self.sequence
    }
}

impl Future for PublishTicket {
    type Output = Result<Ack, PublishError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Worker aborted with the reply still pending.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PublishError::Abandoned {
                document_id: self.document_id.clone(),
                sequence: self.sequence,
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Delivers envelopes to a message bus.
///
/// Cheap to clone; clones share lanes and counters.
#[derive(Clone)]
pub struct PublishPipeline {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PublishPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishPipeline")
            .field("bus", &self.inner.bus.name())
            .field("policy", &self.inner.policy)
            .field("closing", &self.is_closing())
            .finish()
    }
}

impl PublishPipeline {
    pub fn new(bus: Arc<dyn MessageBus>, policy: RetryPolicy) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                bus,
                policy,
                lanes: Mutex::new(HashMap::new()),
                closing: AtomicBool::new(false),
                shutdown_tx,
                counters: Counters::default(),
            }),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Queues `envelope` behind any earlier envelopes for the same document.
    ///
    /// Submission order is fixed when this returns, before the ticket is
    /// awaited. Must be called from within a Tokio runtime.
    pub fn submit(&self, envelope: Envelope) -> PublishTicket {
        let (tx, rx) = oneshot::channel();
        let document_id = envelope.document_id().clone();
        let sequence = envelope.publish_sequence();
        let ticket = PublishTicket {
            document_id: document_id.clone(),
            sequence,
            rx,
        };

        let mut lanes = self.inner.lanes();
        if self.is_closing() {
            drop(lanes);
            self.inner.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            let _ = tx.send(Err(PublishError::Abandoned {
                document_id,
                sequence,
            }));
            return ticket;
        }

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        let job = Job {
            envelope,
            reply: tx,
        };

        match lanes.get_mut(&document_id) {
            Some(lane) => {
                lane.queue.push_back(job);
                debug!(
                    document_id = %document_id,
                    seq = %sequence,
                    queued = lane.queue.len(),
                    "envelope queued behind in-flight publish"
                );
            }
            None => {
                let mut lane = Lane {
                    queue: VecDeque::from([job]),
                    worker: None,
                };
                let inner = Arc::clone(&self.inner);
                let key = document_id.clone();
                let handle = tokio::spawn(async move { run_lane(inner, key).await });
                lane.worker = Some(handle.abort_handle());
                lanes.insert(document_id, lane);
            }
        }

        ticket
    }

    /// Submits `envelope` and waits for it to settle.
    pub async fn publish(&self, envelope: Envelope) -> Result<Ack, PublishError> {
        self.submit(envelope).await
    }

    pub fn stats(&self) -> PipelineStats {
        let c = &self.inner.counters;
        PipelineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            acked: c.acked.load(Ordering::Relaxed),
            exhausted: c.exhausted.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            active_lanes: self.inner.lanes().len(),
        }
    }

    /// Stops accepting envelopes and drains.
    ///
    /// Queued envelopes fail with [`PublishError::Abandoned`]. An attempt
    /// already at the bus may finish within `grace`; an envelope waiting
    /// out a backoff is abandoned instead of retried. Lanes still running
    /// at the deadline are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.inner.shutdown_tx.send_replace(true);

        let queued: Vec<Job> = {
            let mut lanes = self.inner.lanes();
            lanes
                .values_mut()
                .flat_map(|lane| lane.queue.drain(..))
                .collect()
        };
        info!(
            abandoned = queued.len(),
            grace_ms = grace.as_millis() as u64,
            "publish pipeline shutting down"
        );
        for job in queued {
            self.abandon(job);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.inner.lanes().is_empty() {
                info!("publish pipeline drained");
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let remaining: Vec<(DocumentId, Lane)> = self.inner.lanes().drain().collect();
        for (document_id, lane) in remaining {
            warn!(document_id = %document_id, "aborting publish lane after grace period");
            if let Some(worker) = lane.worker {
                worker.abort();
            }
            self.inner
                .counters
                .abandoned
                .fetch_add(1 + lane.queue.len() as u64, Ordering::Relaxed);
        }
    }

    fn abandon(&self, job: Job) {
        self.inner.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        let _ = job.reply.send(Err(PublishError::Abandoned {
            document_id: job.envelope.document_id().clone(),
            sequence: job.envelope.publish_sequence(),
        }));
    }
}

/// Drains one document's queue, one envelope at a time.
async fn run_lane(inner: Arc<Inner>, document_id: DocumentId) {
    loop {
        let job = {
            let mut lanes = inner.lanes();
            let Some(lane) = lanes.get_mut(&document_id) else {
                return;
            };
            match lane.queue.pop_front() {
                Some(job) => job,
                None => {
                    lanes.remove(&document_id);
                    return;
                }
            }
        };

        let result = deliver(&inner, &job.envelope).await;
        let counter = match &result {
            Ok(_) => &inner.counters.acked,
            Err(PublishError::Abandoned { .. }) => &inner.counters.abandoned,
            Err(_) => &inner.counters.exhausted,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        // The submitter may have stopped waiting; the outcome still stands.
        let _ = job.reply.send(result);
    }
}

fn advance(state: &mut PublishState, next: PublishState, envelope: &Envelope) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid publish transition {state} -> {next}"
    );
    debug!(
        document_id = %envelope.document_id(),
        seq = %envelope.publish_sequence(),
        from = %state,
        to = %next,
        "publish state"
    );
    *state = next;
}

#[instrument(
    skip_all,
    fields(
        document_id = %envelope.document_id(),
        seq = %envelope.publish_sequence(),
        bus = inner.bus.name(),
    )
)]
async fn deliver(inner: &Inner, envelope: &Envelope) -> Result<Ack, PublishError> {
    let message = envelope.to_message().map_err(|e| {
        error!(error = %e, "envelope could not be encoded");
        PublishError::Encode(e)
    })?;

    let mut budget = inner.policy.budget();
    let mut shutdown = inner.shutdown_tx.subscribe();
    let started = Instant::now();
    let mut state = PublishState::Pending;

    let exhausted = |attempts: u32, last_error: BusError| PublishError::Exhausted {
        document_id: envelope.document_id().clone(),
        sequence: envelope.publish_sequence(),
        attempts,
        elapsed: started.elapsed(),
        last_error,
    };

    loop {
        advance(&mut state, PublishState::InFlight, envelope);
        let attempt = budget.attempts();

        let outcome = match timeout(
            budget.attempt_timeout(started.elapsed()),
            inner.bus.publish(envelope.topic(), &message),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(BusError::Timeout),
        };

        let err = match outcome {
            Ok(ack) => {
                advance(&mut state, PublishState::Acked, envelope);
                info!(attempt, message_id = %ack.message_id, "envelope published");
                return Ok(ack);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            advance(&mut state, PublishState::Exhausted, envelope);
            error!(attempt, error = %err, "bus rejected envelope");
            return Err(exhausted(attempt, err));
        }

        match budget.on_failure(started.elapsed()) {
            RetryDecision::Retry(delay) => {
                advance(&mut state, PublishState::Retrying, envelope);
                inner.counters.retries.fetch_add(1, Ordering::Relaxed);
                warn!(
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "publish attempt failed, retrying"
                );

                let closing = *shutdown.borrow_and_update();
                let interrupted = closing
                    || tokio::select! {
                        _ = tokio::time::sleep(delay) => false,
                        _ = shutdown.changed() => true,
                    };
                if interrupted {
                    warn!(attempt, "retry abandoned by shutdown");
                    return Err(PublishError::Abandoned {
                        document_id: envelope.document_id().clone(),
                        sequence: envelope.publish_sequence(),
                    });
                }
            }
            RetryDecision::GiveUp(reason) => {
                advance(&mut state, PublishState::Exhausted, envelope);
                error!(
                    attempt,
                    error = %err,
                    reason = match reason {
                        GiveUp::MaxRetries => "max_retries",
                        GiveUp::WaitBudget => "max_total_wait",
                    },
                    waited_ms = budget.waited().as_millis() as u64,
                    "publish retries exhausted"
                );
                return Err(exhausted(attempt, err));
            }
        }
    }
}
