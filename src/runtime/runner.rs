use crate::runtime::status::PollOutcome;
use crate::sink::UpdateStream;
use crate::{PollerConfig, UpdatePoller, UpdateSource};
use anyhow::{Context, Result};
use std::future::Future;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates the poller lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner<S: UpdateSource> {
    poller: UpdatePoller<S>,
    shutdown: CancellationToken,
    started: bool,
}

impl<S: UpdateSource> Runner<S> {
    /// Creates a new runner and wires a root [`CancellationToken`] that propagates
    /// to every poll run.
    pub fn new(config: PollerConfig, source: S) -> Self {
        let shutdown = CancellationToken::new();
        let poller = UpdatePoller::with_cancellation_token(config, source, shutdown.clone());
        Self {
            poller,
            shutdown,
            started: false,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn poller(&self) -> &UpdatePoller<S> {
        &self.poller
    }

    /// Starts polling. After a previous `stop` the run resumes from the last committed
    /// cursor instead of the configured initial cursor.
    pub fn start(&mut self) -> Result<UpdateStream<S::Update>> {
        if self.started {
            anyhow::bail!("runner already started");
        }

        let cursor = match self.poller.last_outcome() {
            Some(outcome) => outcome.cursor,
            None => self.poller.config().initial_cursor(),
        };
        let stream = self.poller.start_from(cursor)?;
        self.started = true;
        Ok(stream)
    }

    /// Stops the run gracefully by cancelling the root token and joining the poller.
    ///
    /// Returns the outcome of the most recent run if it was already stopped.
    pub async fn stop(&mut self) -> Result<PollOutcome> {
        if !self.started {
            return self
                .poller
                .last_outcome()
                .cloned()
                .context("runner was never started");
        }

        self.shutdown.cancel();
        let outcome = self.poller.stop().await;
        self.started = false;
        self.reinitialize_shutdown_token();
        outcome
    }

    /// Starts polling, hands the stream to `consumer`, and runs until a Ctrl-C (SIGINT)
    /// is received, the shutdown token is cancelled elsewhere, or the run stops on its own.
    ///
    /// The consumer task is joined after the poller stops; it sees the end of the stream.
    pub async fn run_until_ctrl_c<F, Fut>(&mut self, consumer: F) -> Result<PollOutcome>
    where
        F: FnOnce(UpdateStream<S::Update>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stream = self.start()?;
        let status = self
            .poller
            .status()
            .context("poller did not expose a terminal status")?;
        let consumer_handle = tokio::spawn(consumer(stream));
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                tracing::info!("runner shutdown token cancelled");
            }
            outcome = status.wait() => {
                tracing::info!(reason = %outcome.reason, "update poller stopped on its own");
            }
        }

        let outcome = self.stop().await;
        if let Err(err) = consumer_handle.await {
            tracing::warn!(error = %err, "consumer task terminated unexpectedly");
        }
        outcome
    }

    fn reinitialize_shutdown_token(&mut self) {
        self.shutdown = CancellationToken::new();
        self.poller.replace_shutdown_root(self.shutdown.clone());
    }
}
