//! Integration tests for the firehose lifecycle.
//!
//! These tests run the supervisor against a scripted orchestrator:
//! 1. New allocations flow from the list into the sink
//! 2. Restarts resume from the restored cursor
//! 3. List failures are retried after a cancellable backoff
//! 4. Cursor values are published periodically and on shutdown, once taken
//!
//! Uses MockAllocationsApi, MockTransport and MockSink.

use std::sync::Arc;
use std::time::Duration;

use firehose::mock::{MockAllocationsApi, MockSink, MockTransport};
use firehose::sink::QueueSink;
use firehose::{Firehose, FirehoseError, RestoreError, RestoreValue, WatcherConfig};
use firehose_events::Allocation;
use tokio::task::JoinHandle;

fn allocation(modify_index: u64) -> Allocation {
    Allocation::new(modify_index)
        .with_field("ID", format!("alloc-{modify_index}"))
        .with_field("ClientStatus", "running")
}

fn delivered_indexes(transport: &MockTransport) -> Vec<u64> {
    transport
        .delivered()
        .iter()
        .map(|payload| Allocation::from_payload(payload).unwrap().modify_index)
        .collect()
}

fn spawn_start<A>(firehose: &Arc<Firehose<A>>) -> JoinHandle<Result<(), FirehoseError>>
where
    A: firehose::AllocationsApi,
{
    let firehose = Arc::clone(firehose);
    tokio::spawn(async move { firehose.start().await })
}

#[tokio::test(start_paused = true)]
async fn test_new_allocation_is_delivered_once() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response(vec![allocation(100)], 100);
    api.push_response(vec![allocation(100)], 100);

    let sink = Arc::new(QueueSink::new(MockTransport::new(), 1, 16));
    let firehose = Arc::new(Firehose::new(Arc::clone(&api), sink.clone()));
    let mut updates = firehose.take_updates().await.unwrap();

    let run = spawn_start(&firehose);
    api.wait_for_queries(3).await;
    firehose.stop().await;
    run.await.unwrap().unwrap();

    let wait_indexes: Vec<u64> = api.queries().iter().map(|q| q.wait_index).collect();
    assert_eq!(wait_indexes, vec![0, 100, 100]);
    assert_eq!(delivered_indexes(sink.transport()), vec![100]);

    let mut last = None;
    while let Ok(cursor) = updates.try_recv() {
        last = Some(cursor);
    }
    assert_eq!(last, Some(100));
}

#[tokio::test(start_paused = true)]
async fn test_resume_from_restored_cursor() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response(
        vec![allocation(49), allocation(50), allocation(51), allocation(55)],
        55,
    );

    let sink = Arc::new(QueueSink::new(MockTransport::new(), 2, 16));
    let mut firehose = Firehose::new(Arc::clone(&api), sink.clone());
    firehose.set_restore_value(RestoreValue::Int(50)).unwrap();
    let firehose = Arc::new(firehose);

    let run = spawn_start(&firehose);
    api.wait_for_queries(2).await;
    firehose.stop().await;
    run.await.unwrap().unwrap();

    assert_eq!(api.queries()[0].wait_index, 50);
    assert_eq!(api.queries()[1].wait_index, 55);

    let mut delivered = delivered_indexes(sink.transport());
    delivered.sort();
    assert_eq!(delivered, vec![51, 55]);
}

#[test]
fn test_invalid_restore_value_is_rejected() {
    let mut firehose = Firehose::new(
        Arc::new(MockAllocationsApi::new()),
        Arc::new(MockSink::new()),
    );

    let err = firehose
        .set_restore_value(RestoreValue::Invalid("string 'abc'".to_string()))
        .unwrap_err();

    assert_eq!(
        err,
        RestoreError::InvalidRestoreType("string 'abc'".to_string())
    );
    assert_eq!(firehose.cursor(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_list_errors_are_retried_after_backoff() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_error("no cluster leader");
    api.push_error("no cluster leader");
    api.push_response(vec![allocation(7)], 7);

    let sink = Arc::new(MockSink::new());
    let firehose = Arc::new(Firehose::new(Arc::clone(&api), sink.clone()));

    let started = tokio::time::Instant::now();
    let run = spawn_start(&firehose);
    api.wait_for_queries(4).await;
    let elapsed = started.elapsed();

    firehose.stop().await;
    run.await.unwrap().unwrap();

    // Two failures, each followed by the default ten second backoff.
    assert!(elapsed >= Duration::from_secs(20), "elapsed {elapsed:?}");

    // Retries repeat the same query.
    let wait_indexes: Vec<u64> = api.queries().iter().map(|q| q.wait_index).collect();
    assert_eq!(wait_indexes, vec![0, 0, 0, 7]);
    assert_eq!(sink.put_indexes(), vec![7]);
}

#[tokio::test]
async fn test_shutdown_interrupts_retry_backoff() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_error("connection refused");

    let firehose = Arc::new(
        Firehose::new(Arc::clone(&api), Arc::new(MockSink::new())).with_watcher_config(
            WatcherConfig {
                retry_backoff: Duration::from_secs(3600),
                ..WatcherConfig::default()
            },
        ),
    );

    let run = spawn_start(&firehose);
    api.wait_for_queries(1).await;

    tokio::time::timeout(Duration::from_secs(5), firehose.stop())
        .await
        .expect("stop should not wait out the backoff");
    run.await.unwrap().unwrap();
    assert_eq!(api.queries().len(), 1);
}

#[tokio::test]
async fn test_slow_sink_throttles_polling() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response((1..=5).map(allocation).collect(), 5);

    let sink = Arc::new(QueueSink::new(MockTransport::paused(), 1, 1));
    let firehose = Arc::new(
        Firehose::new(Arc::clone(&api), sink.clone()).with_watcher_config(WatcherConfig {
            wait_time: Duration::from_millis(20),
            ..WatcherConfig::default()
        }),
    );

    let run = spawn_start(&firehose);
    sink.transport().wait_for_attempts(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The watcher is stuck in put; it has not polled again.
    assert_eq!(api.queries().len(), 1);

    sink.transport().release(5);
    api.wait_for_queries(2).await;
    assert_eq!(api.queries()[1].wait_index, 5);

    firehose.stop().await;
    run.await.unwrap().unwrap();
    assert_eq!(delivered_indexes(sink.transport()), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_cursor_published_periodically_and_on_stop() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response(vec![allocation(12)], 12);

    let firehose = Arc::new(
        Firehose::new(Arc::clone(&api), Arc::new(MockSink::new()))
            .with_publish_interval(Duration::from_secs(5)),
    );
    let mut updates = firehose.take_updates().await.unwrap();

    let run = spawn_start(&firehose);

    // First tick fires one interval after start.
    assert_eq!(updates.recv().await, Some(12));
    assert_eq!(updates.recv().await, Some(12));

    firehose.stop().await;
    run.await.unwrap().unwrap();

    let mut last = None;
    while let Ok(cursor) = updates.try_recv() {
        last = Some(cursor);
    }
    assert_eq!(last, Some(12));
}

#[tokio::test(start_paused = true)]
async fn test_final_cursor_published_without_tick() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response(vec![allocation(3)], 3);

    let firehose = Arc::new(
        Firehose::new(Arc::clone(&api), Arc::new(MockSink::new()))
            .with_publish_interval(Duration::from_secs(3600)),
    );
    let mut updates = firehose.take_updates().await.unwrap();

    let run = spawn_start(&firehose);
    api.wait_for_queries(2).await;
    firehose.stop().await;
    run.await.unwrap().unwrap();

    assert_eq!(updates.try_recv().ok(), Some(3));
    assert!(updates.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_prompt_when_updates_never_taken() {
    let api = Arc::new(MockAllocationsApi::new());
    api.push_response(vec![allocation(7)], 7);

    let firehose = Arc::new(
        Firehose::new(Arc::clone(&api), Arc::new(MockSink::new()))
            .with_publish_interval(Duration::from_secs(1)),
    );

    let run = spawn_start(&firehose);
    // Enough ticks to fill the update channel if anything were sent.
    tokio::time::sleep(Duration::from_secs(20)).await;

    let started = tokio::time::Instant::now();
    firehose.stop().await;
    run.await.unwrap().unwrap();
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        started.elapsed()
    );

    // Taking the receiver late yields nothing that was skipped.
    let mut updates = firehose.take_updates().await.unwrap();
    assert!(updates.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let sink = Arc::new(MockSink::new());
    let firehose = Arc::new(Firehose::new(
        Arc::new(MockAllocationsApi::new()),
        sink.clone(),
    ));

    let run = spawn_start(&firehose);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = tokio::spawn({
        let firehose = Arc::clone(&firehose);
        async move { firehose.stop().await }
    });
    firehose.stop().await;
    second.await.unwrap();
    firehose.stop().await;

    run.await.unwrap().unwrap();
    assert_eq!(sink.stop_count(), 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let firehose = Arc::new(Firehose::new(
        Arc::new(MockAllocationsApi::new()),
        Arc::new(MockSink::new()),
    ));

    let run = spawn_start(&firehose);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = firehose.start().await.unwrap_err();
    assert!(matches!(err, FirehoseError::AlreadyStarted));

    firehose.stop().await;
    run.await.unwrap().unwrap();
}
