use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_is_contiguous, init_tracing, test_config},
    scripted_source::{ids, Exhausted, ScriptedSource, Step},
};
use anyhow::{Context, Result};
use pollstream::{Runner, StopReason};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_exits_when_the_poller_gives_up() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(
        vec![Step::Batch(vec![1]), Step::Batch(vec![2, 3])],
        Exhausted::FailForever,
    );
    let config = test_config().max_consecutive_errors(1).build()?;
    let mut runner = Runner::new(config, source);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let outcome = timeout(
        Duration::from_secs(5),
        runner.run_until_ctrl_c(move |stream| async move {
            while let Some(batch) = stream.recv().await {
                sink.lock().await.push(ids(&batch));
            }
        }),
    )
    .await
    .context("runner should stop after the poller gives up")??;

    assert!(matches!(
        outcome.reason,
        StopReason::RetriesExhausted { attempts: 1, .. }
    ));
    assert_eq!(outcome.cursor, Some(4));
    assert_eq!(*received.lock().await, vec![vec![1], vec![2, 3]]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_stops_when_token_cancelled_externally() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(Vec::new(), Exhausted::Idle);
    let mut runner = Runner::new(test_config().build()?, source);
    let token = runner.cancellation_token();

    let cancel = tokio::spawn(async move {
        sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let outcome = timeout(
        Duration::from_secs(5),
        runner.run_until_ctrl_c(|stream| async move {
            while stream.recv().await.is_some() {}
        }),
    )
    .await
    .context("runner did not observe external cancellation")??;
    cancel.await?;

    assert!(outcome.reason.is_cancelled());
    assert!(
        !runner.cancellation_token().is_cancelled(),
        "runner should install a fresh root token after stopping"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_restart_resumes_from_last_cursor() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::sequential(1);
    let config = test_config().initial_cursor(1).sink_capacity(1).build()?;
    let mut runner = Runner::new(config, source.clone());

    let stream = runner.start()?;
    let mut seen = Vec::new();
    for _ in 0..3 {
        let batch = timeout(Duration::from_secs(1), stream.recv())
            .await?
            .context("first run should deliver")?;
        seen.extend(ids(&batch));
    }

    let first = runner.stop().await?;
    assert!(first.reason.is_cancelled());
    while let Some(batch) = stream.recv().await {
        seen.extend(ids(&batch));
    }
    let resume_at = first.cursor.context("first run committed batches")?;
    assert_eq!(seen.last().copied(), Some(resume_at - 1));

    let stream = runner.start()?;
    let batch = timeout(Duration::from_secs(1), stream.recv())
        .await?
        .context("second run should deliver")?;
    seen.extend(ids(&batch));
    assert_eq!(ids(&batch), vec![resume_at]);
    assert_is_contiguous(&seen);

    let second = runner.stop().await?;
    assert!(second.cursor > first.cursor);
    assert_eq!(
        source.offsets().iter().filter(|offset| **offset == Some(1)).count(),
        1,
        "restart must not rewind to the configured initial cursor"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runner_returns_when_the_source_panics() -> Result<()> {
    init_tracing();
    let source = ScriptedSource::new(
        vec![Step::Batch(vec![1]), Step::Panic("source exploded")],
        Exhausted::Idle,
    );
    let mut runner = Runner::new(test_config().build()?, source);

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let result = timeout(
        Duration::from_secs(5),
        runner.run_until_ctrl_c(move |stream| async move {
            while let Some(batch) = stream.recv().await {
                sink.lock().await.push(ids(&batch));
            }
        }),
    )
    .await
    .context("runner must return once the poll task has died")?;

    let err = result.expect_err("a panicked poll task surfaces as an error");
    assert!(
        format!("{err:#}").contains("poll task terminated unexpectedly"),
        "unexpected error: {err:#}"
    );
    assert_eq!(*received.lock().await, vec![vec![1]]);

    let outcome = runner.stop().await?;
    assert!(matches!(outcome.reason, StopReason::Aborted));
    assert_eq!(outcome.cursor, Some(2));
    Ok(())
}

#[tokio::test]
async fn stopping_an_idle_runner_is_an_error() -> Result<()> {
    let source = ScriptedSource::new(Vec::new(), Exhausted::Idle);
    let mut runner = Runner::new(test_config().build()?, source);
    assert!(runner.stop().await.is_err());
    Ok(())
}
