mod harness;

use std::sync::Arc;
use std::time::Duration;

use docrelay_events::ChangeEvent;
use docrelay_relay::bus::BusError;
use docrelay_relay::pipeline::{PublishError, PublishPipeline};
use docrelay_retry::{BackoffPolicy, RetryPolicy};
use harness::{envelope, policy, relay, ScriptedBus};
use serde_json::json;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn one_document_publishes_in_submission_order() {
    let bus = ScriptedBus::with_delay(Duration::from_millis(50));
    let pipeline = PublishPipeline::new(bus.clone(), policy(3, Duration::from_secs(10)));

    let tickets: Vec<_> = (1..=5).map(|seq| pipeline.submit(envelope("abc", seq))).collect();
    for ticket in tickets {
        ticket.await.unwrap();
    }

    assert_eq!(bus.sequences_for("abc"), vec![1, 2, 3, 4, 5]);
    assert_eq!(bus.max_in_flight_per_document(), 1);
    assert_eq!(pipeline.stats().active_lanes, 0);
}

#[tokio::test(start_paused = true)]
async fn different_documents_publish_concurrently() {
    let bus = ScriptedBus::with_delay(Duration::from_millis(100));
    let pipeline = PublishPipeline::new(bus.clone(), policy(3, Duration::from_secs(10)));
    let started = Instant::now();

    let tickets: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .enumerate()
        .map(|(i, doc)| pipeline.submit(envelope(doc, i as u64 + 1)))
        .collect();
    for ticket in tickets {
        ticket.await.unwrap();
    }

    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(bus.max_in_flight_total(), 4);
    assert_eq!(bus.max_in_flight_per_document(), 1);
}

#[tokio::test(start_paused = true)]
async fn retrying_envelope_holds_back_its_successor_only() {
    let bus = ScriptedBus::new();
    bus.fail(
        "abc",
        [
            BusError::Unavailable("503".into()),
            BusError::Unavailable("503".into()),
        ],
    );
    let pipeline = PublishPipeline::new(bus.clone(), policy(5, Duration::from_secs(10)));

    let first = pipeline.submit(envelope("abc", 1));
    let second = pipeline.submit(envelope("abc", 2));
    let other = pipeline.submit(envelope("xyz", 3));

    first.await.unwrap();
    second.await.unwrap();
    other.await.unwrap();

    assert_eq!(bus.sequences_for("abc"), vec![1, 2]);
    // xyz is not stuck behind abc's backoff.
    assert_eq!(bus.published()[0].document_id, "xyz");
    assert_eq!(bus.attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn exhausted_envelope_does_not_block_the_lane() {
    let bus = ScriptedBus::new();
    bus.fail("abc", [BusError::Rejected("403".into())]);
    let pipeline = PublishPipeline::new(bus.clone(), policy(5, Duration::from_secs(10)));

    let first = pipeline.submit(envelope("abc", 1));
    let second = pipeline.submit(envelope("abc", 2));

    assert!(matches!(
        first.await,
        Err(PublishError::Exhausted { attempts: 1, .. })
    ));
    second.await.unwrap();
    assert_eq!(bus.sequences_for("abc"), vec![2]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_events_publish_in_sequence_order() {
    let bus = ScriptedBus::with_delay(Duration::from_millis(10));
    let relay = relay(bus.clone(), policy(3, Duration::from_secs(10)));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                relay
                    .handle(ChangeEvent::created("/entries/abc", json!({"i": i})))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let sequences = bus.sequences_for("abc");
    assert_eq!(sequences.len(), 16);
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{sequences:?}");
    assert_eq!(bus.max_in_flight_per_document(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_abandons_queued_and_lets_in_flight_finish() {
    let bus = ScriptedBus::with_delay(Duration::from_millis(500));
    let pipeline = PublishPipeline::new(bus.clone(), policy(3, Duration::from_secs(10)));

    let first = pipeline.submit(envelope("abc", 1));
    let second = pipeline.submit(envelope("abc", 2));
    let third = pipeline.submit(envelope("abc", 3));
    tokio::time::sleep(Duration::from_millis(10)).await;

    pipeline.shutdown(Duration::from_secs(1)).await;

    first.await.unwrap();
    assert!(matches!(second.await, Err(PublishError::Abandoned { .. })));
    assert!(matches!(third.await, Err(PublishError::Abandoned { .. })));
    assert_eq!(bus.sequences_for("abc"), vec![1]);

    let stats = pipeline.stats();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.abandoned, 2);
    assert_eq!(stats.active_lanes, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_lanes_still_running_after_grace() {
    let bus = ScriptedBus::with_delay(Duration::from_secs(5));
    let policy = RetryPolicy {
        attempt_timeout: Duration::from_secs(30),
        backoff: BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        },
        ..RetryPolicy::default()
    };
    let pipeline = PublishPipeline::new(bus.clone(), policy);

    let ticket = pipeline.submit(envelope("abc", 1));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let started = Instant::now();

    pipeline.shutdown(Duration::from_millis(100)).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(matches!(ticket.await, Err(PublishError::Abandoned { .. })));
    assert!(bus.published().is_empty());
    assert_eq!(pipeline.stats().active_lanes, 0);
}
