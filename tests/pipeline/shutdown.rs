use std::time::Duration;

use crate::support::{
    helpers::{assert_fetches_settle, init_tracing, test_config, wait_for_fetch_errors},
    scripted_source::{ids, Exhausted, ScriptedSource, Step},
};
use anyhow::{Context, Result};
use pollstream::{StopReason, UpdatePoller};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_stop_returns_the_same_outcome() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(Vec::new(), Exhausted::Idle);
    let mut poller = UpdatePoller::new(test_config().initial_cursor(4).build()?, source.clone());
    let stream = poller.start()?;

    let first = poller.stop().await?;
    let second = poller.stop().await?;
    assert!(first.reason.is_cancelled());
    assert!(second.reason.is_cancelled());
    assert_eq!(first.cursor, Some(4));
    assert_eq!(second.cursor, first.cursor);

    assert_eq!(stream.recv().await, None);
    assert!(stream.is_closed());
    assert_fetches_settle(&source, Duration::from_millis(60)).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_after_natural_stop_keeps_the_first_outcome() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(vec![Step::Batch(vec![1])], Exhausted::FailForever);
    let root = CancellationToken::new();
    let config = test_config().max_consecutive_errors(2).build()?;
    let mut poller = UpdatePoller::with_cancellation_token(config, source.clone(), root.clone());
    let stream = poller.start()?;
    let status = poller.status().context("running poller exposes its status")?;

    while timeout(Duration::from_secs(1), stream.recv()).await?.is_some() {}
    let recorded = timeout(Duration::from_secs(1), status.wait()).await?;
    assert!(matches!(
        recorded.reason,
        StopReason::RetriesExhausted { attempts: 2, .. }
    ));

    root.cancel();
    let outcome = poller.stop().await?;
    assert!(matches!(
        outcome.reason,
        StopReason::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(outcome.cursor, Some(2));
    assert!(matches!(
        status.outcome().context("status stays recorded")?.reason,
        StopReason::RetriesExhausted { .. }
    ));
    assert_fetches_settle(&source, Duration::from_millis(60)).await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_interrupts_retry_sleep() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(Vec::new(), Exhausted::FailForever);
    let config = test_config().retry_delay(Duration::from_secs(30)).build()?;
    let mut poller = UpdatePoller::new(config, source.clone());
    let stream = poller.start()?;

    wait_for_fetch_errors(&poller.telemetry(), 1, Duration::from_secs(1)).await?;
    let started = Instant::now();
    let outcome = timeout(Duration::from_secs(1), poller.stop())
        .await
        .context("stop must not wait for the retry delay")??;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(outcome.reason.is_cancelled());
    assert_eq!(outcome.consecutive_errors, 1);
    assert_eq!(source.fetches(), 1);
    assert_eq!(stream.recv().await, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_flight_fetch_completes_before_the_run_stops() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(
        vec![Step::Delayed(Duration::from_millis(80), vec![20, 21])],
        Exhausted::Idle,
    );
    let mut poller = UpdatePoller::new(test_config().build()?, source.clone());
    let stream = poller.start()?;
    let token = poller
        .cancellation_token()
        .context("running poller exposes its run token")?;

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();

    let outcome = timeout(Duration::from_secs(1), poller.wait()).await??;
    assert!(outcome.reason.is_cancelled());
    assert_eq!(outcome.cursor, Some(22));
    assert_eq!(source.fetches(), 1, "no fetch may follow cancellation");

    let batch = stream.recv().await.context("batch that fit was committed")?;
    assert_eq!(ids(&batch), vec![20, 21]);
    assert_eq!(stream.recv().await, None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropping_every_consumer_stops_the_run() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::sequential(1);
    let config = test_config().initial_cursor(1).sink_capacity(1).build()?;
    let mut poller = UpdatePoller::new(config, source.clone());
    let stream = poller.start()?;
    let second = stream.clone();

    let batch = timeout(Duration::from_secs(1), second.recv())
        .await?
        .context("first batch")?;
    assert_eq!(ids(&batch), vec![1]);
    drop(stream);
    drop(second);

    let outcome = timeout(Duration::from_secs(1), poller.wait()).await??;
    assert!(matches!(outcome.reason, StopReason::SinkDisconnected));
    assert_fetches_settle(&source, Duration::from_millis(60)).await;
    Ok(())
}

#[tokio::test]
async fn waiting_on_a_poller_that_never_started_is_an_error() -> Result<()> {
    let source = ScriptedSource::new(Vec::new(), Exhausted::Idle);
    let mut poller = UpdatePoller::new(test_config().build()?, source);
    assert!(poller.wait().await.is_err());
    assert!(poller.stop().await.is_err());
    assert!(!poller.is_running());
    Ok(())
}
