//! Long-poll delivery loop.
//!
//! `UpdatePoller` owns the run-scoped pieces and a single poll task:
//! - `state` holds the cursor and failure streak and decides the next state.
//! - `backoff` computes and sleeps the retry delay.
//! - `lifecycle` wires the run token, the terminal status, and the metrics reporter.
//!
//! The poll task fetches, publishes into the sink, and only then advances the cursor.

use super::backoff::{sleep_with_cancellation, RetryBackoff, SleepOutcome};
use super::lifecycle::{LifecycleHandles, LifecycleSpawnParams};
use super::state::{PollerState, RunState};
use crate::runtime::config::PollerConfig;
use crate::runtime::progress::CursorTracker;
use crate::runtime::status::{PollOutcome, StopReason, TerminalStatus};
use crate::runtime::telemetry::Telemetry;
use crate::sink::{self, PublishOutcome, UpdateSink, UpdateStream};
use crate::source::{batch_high_water, UpdateId, UpdateSource};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct UpdatePoller<S: UpdateSource> {
    config: PollerConfig,
    source: Arc<S>,
    shutdown_root: CancellationToken,
    telemetry: Arc<Telemetry>,
    progress: Arc<CursorTracker>,
    lifecycle: Option<LifecycleHandles>,
    poll_handle: Option<JoinHandle<PollOutcome>>,
    status: Option<TerminalStatus>,
    last_outcome: Option<PollOutcome>,
}

struct PollTaskParams<S: UpdateSource> {
    source: Arc<S>,
    sink: UpdateSink<S::Update>,
    config: PollerConfig,
    start_cursor: Option<UpdateId>,
    run_token: CancellationToken,
    reporter_token: CancellationToken,
    telemetry: Arc<Telemetry>,
    progress: Arc<CursorTracker>,
    status: TerminalStatus,
}

impl<S: UpdateSource> UpdatePoller<S> {
    /// Creates a poller with its own root cancellation token.
    ///
    /// Use [`Self::with_cancellation_token`] to tie it into an existing shutdown mechanism.
    pub fn new(config: PollerConfig, source: S) -> Self {
        Self::with_cancellation_token(config, source, CancellationToken::new())
    }

    /// Creates a poller whose runs are children of `shutdown_token`.
    pub fn with_cancellation_token(
        config: PollerConfig,
        source: S,
        shutdown_token: CancellationToken,
    ) -> Self {
        let progress = Arc::new(CursorTracker::new(config.initial_cursor()));
        Self {
            config,
            source: Arc::new(source),
            shutdown_root: shutdown_token,
            telemetry: Arc::new(Telemetry::default()),
            progress,
            lifecycle: None,
            poll_handle: None,
            status: None,
            last_outcome: None,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Cursor after the last batch handed to the sink, or the start cursor if nothing
    /// was delivered yet. `None` while the source still chooses the starting point.
    pub fn last_cursor(&self) -> Option<UpdateId> {
        self.progress.current()
    }

    /// `true` while the poll task of the current run has not finished.
    pub fn is_running(&self) -> bool {
        self.poll_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Terminal status of the current or most recent run.
    pub fn status(&self) -> Option<TerminalStatus> {
        self.status.clone()
    }

    /// Outcome of the most recent run that was joined by `stop` or `wait`.
    pub fn last_outcome(&self) -> Option<&PollOutcome> {
        self.last_outcome.as_ref()
    }

    /// Token of the current run. Cancelling it stops the run without touching the root.
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.lifecycle
            .as_ref()
            .map(|handles| handles.run_token.clone())
    }

    /// Replaces the root token used to derive per-run tokens.
    /// Only call this while no run is active (between `stop` and `start`).
    pub fn replace_shutdown_root(&mut self, shutdown: CancellationToken) {
        debug_assert!(
            self.poll_handle.is_none(),
            "shutdown token should not change while the poller is running"
        );
        self.shutdown_root = shutdown;
    }

    /// Starts polling from the configured initial cursor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<UpdateStream<S::Update>> {
        self.start_from(self.config.initial_cursor())
    }

    /// Starts polling from `cursor`; `None` lets the source choose.
    ///
    /// Returns an error if a run is active. A finished run that was never joined is
    /// reaped first.
    pub fn start_from(&mut self, cursor: Option<UpdateId>) -> Result<UpdateStream<S::Update>> {
        if self.poll_handle.is_some() {
            if self.is_running() {
                bail!("update poller already running");
            }
            bail!("previous run finished but was not joined; call stop or wait first");
        }

        debug_assert!(
            self.config.validate().is_ok(),
            "PollerConfig should have been validated at construction time"
        );

        let (sink, stream) = sink::channel(self.config.sink_capacity());
        self.progress.reset(cursor);

        let lifecycle = LifecycleHandles::spawn(LifecycleSpawnParams {
            shutdown_root: &self.shutdown_root,
            telemetry: self.telemetry.clone(),
            queue: sink.queue(),
            metrics_interval: self.config.metrics_interval(),
        });
        let status = lifecycle.status();

        let handle = tokio::spawn(run_poll_loop(PollTaskParams {
            source: self.source.clone(),
            sink,
            config: self.config.clone(),
            start_cursor: cursor,
            run_token: lifecycle.run_token.clone(),
            reporter_token: lifecycle.reporter_token.clone(),
            telemetry: self.telemetry.clone(),
            progress: self.progress.clone(),
            status: status.clone(),
        }));

        self.poll_handle = Some(handle);
        self.lifecycle = Some(lifecycle);
        self.status = Some(status);
        self.last_outcome = None;
        Ok(stream)
    }

    /// Cancels the current run and waits for it to wind down.
    ///
    /// Calling it again after the run was joined returns the same outcome. If the poll
    /// task panicked the first call fails and later calls return the `Aborted` outcome.
    pub async fn stop(&mut self) -> Result<PollOutcome> {
        if self.poll_handle.is_none() {
            return self
                .last_outcome
                .clone()
                .context("update poller was never started");
        }

        tracing::info!("stopping update poller");
        if let Some(handles) = &self.lifecycle {
            handles.run_token.cancel();
        }
        self.join().await
    }

    /// Waits for the current run to stop on its own without cancelling it.
    pub async fn wait(&mut self) -> Result<PollOutcome> {
        if self.poll_handle.is_none() {
            return self
                .last_outcome
                .clone()
                .context("update poller was never started");
        }
        self.join().await
    }

    async fn join(&mut self) -> Result<PollOutcome> {
        let joined = match self.poll_handle.take() {
            Some(handle) => handle.await,
            None => bail!("update poller has no active run"),
        };

        if let Some(handles) = self.lifecycle.take() {
            handles.shutdown().await;
        }

        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                self.last_outcome = self.status.as_ref().and_then(TerminalStatus::outcome);
                return Err(anyhow::Error::new(err).context("poll task terminated unexpectedly"));
            }
        };
        tracing::debug!(reason = %outcome.reason, cursor = ?outcome.cursor, "update poller joined");
        self.last_outcome = Some(outcome.clone());
        Ok(outcome)
    }
}

impl<S: UpdateSource> Drop for UpdatePoller<S> {
    fn drop(&mut self) {
        if let Some(handles) = &self.lifecycle {
            handles.run_token.cancel();
        }
    }
}

/// Records an `Aborted` outcome if the poll task unwinds before reporting one, and stops
/// the metrics reporter on every exit path.
struct ExitGuard {
    status: TerminalStatus,
    progress: Arc<CursorTracker>,
    reporter_token: CancellationToken,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.status.record(PollOutcome {
            reason: StopReason::Aborted,
            cursor: self.progress.current(),
            consecutive_errors: 0,
        });
        self.reporter_token.cancel();
    }
}

async fn run_poll_loop<S: UpdateSource>(params: PollTaskParams<S>) -> PollOutcome {
    let PollTaskParams {
        source,
        sink,
        config,
        start_cursor,
        run_token,
        reporter_token,
        telemetry,
        progress,
        status,
    } = params;
    // Declared after `sink` so it drops first: the status is recorded before the stream ends.
    let _exit = ExitGuard {
        status: status.clone(),
        progress: progress.clone(),
        reporter_token,
    };

    let backoff = RetryBackoff::new(config.retry_delay(), config.max_retry_delay());
    let error_limit = config.max_consecutive_errors();
    let mut state = RunState::new(start_cursor);

    tracing::info!(
        cursor = ?state.cursor(),
        batch_limit = ?config.batch_limit(),
        sink_capacity = sink.capacity(),
        max_consecutive_errors = ?error_limit,
        "starting update poller"
    );

    let reason = loop {
        if run_token.is_cancelled() {
            break StopReason::Cancelled;
        }

        let request = config.fetch_request(state.cursor());
        telemetry.record_fetch();
        let batch = match source.fetch_updates(&request).await {
            Ok(batch) => batch,
            Err(err) => {
                telemetry.record_fetch_error();
                if state.record_failure(error_limit) == PollerState::Stopped {
                    break StopReason::RetriesExhausted {
                        attempts: state.consecutive_errors(),
                        last_error: Arc::new(err),
                    };
                }

                let delay = backoff.delay_for(state.consecutive_errors());
                tracing::warn!(
                    error = %err,
                    attempt = state.consecutive_errors(),
                    cursor = ?state.cursor(),
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "update fetch failed; backing off"
                );

                if run_token.is_cancelled() {
                    break StopReason::Cancelled;
                }
                match sleep_with_cancellation(delay, &run_token).await {
                    SleepOutcome::Elapsed => continue,
                    SleepOutcome::Cancelled => break StopReason::Cancelled,
                }
            }
        };

        let Some(high_water) = batch_high_water(&batch) else {
            state.record_empty();
            telemetry.record_empty_fetch();
            tracing::trace!(cursor = ?state.cursor(), "long poll returned no updates");
            continue;
        };

        let updates = batch.len();
        match sink.publish(batch, &run_token).await {
            PublishOutcome::Delivered { waited } => {
                if waited {
                    telemetry.record_backpressure_wait();
                }
                let cursor = state.commit_batch(high_water);
                progress.mark_committed(cursor);
                telemetry.record_published_batch(updates);
                tracing::debug!(updates, high_water, cursor, "published update batch");
            }
            PublishOutcome::Cancelled => {
                tracing::debug!(
                    updates,
                    cursor = ?state.cursor(),
                    "dropping unpublished batch after cancellation"
                );
                break StopReason::Cancelled;
            }
            PublishOutcome::Disconnected => break StopReason::SinkDisconnected,
        }
    };

    let outcome = PollOutcome {
        reason,
        cursor: state.cursor(),
        consecutive_errors: state.consecutive_errors(),
    };
    status.record(outcome.clone());
    sink.close();
    outcome
}
