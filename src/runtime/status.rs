use crate::source::{SourceError, UpdateId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Why a poll run reached its terminal state.
#[derive(Debug, Clone)]
pub enum StopReason {
    /// The run's cancellation token fired.
    Cancelled,
    /// `attempts` back-to-back fetches failed and the configured bound was reached.
    RetriesExhausted {
        attempts: u32,
        last_error: Arc<SourceError>,
    },
    /// Every consumer dropped its stream handle.
    SinkDisconnected,
    /// The poll task unwound before reporting, e.g. because the source panicked.
    Aborted,
}

impl StopReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        match self {
            Self::RetriesExhausted { last_error, .. } => Some(last_error.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("cancelled"),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} failed fetches: {last_error}"),
            Self::SinkDisconnected => f.write_str("all consumers disconnected"),
            Self::Aborted => f.write_str("poll task aborted"),
        }
    }
}

/// Terminal report of a poll run: why it stopped and the run state it stopped with.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub reason: StopReason,
    /// Cursor the next fetch would have used. Pass it to `start_from` to resume.
    pub cursor: Option<UpdateId>,
    pub consecutive_errors: u32,
}

/// Side channel carrying the [`PollOutcome`] once the run stops.
///
/// The first recorded outcome wins; later calls are ignored.
#[derive(Clone, Default)]
pub struct TerminalStatus {
    inner: Arc<StatusInner>,
}

#[derive(Default)]
struct StatusInner {
    recorded: AtomicBool,
    outcome: Mutex<Option<PollOutcome>>,
    notify: Notify,
}

impl TerminalStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, outcome: PollOutcome) -> bool {
        if self.inner.recorded.swap(true, Ordering::SeqCst) {
            return false;
        }

        match &outcome.reason {
            StopReason::RetriesExhausted { .. } | StopReason::Aborted => tracing::error!(
                reason = %outcome.reason,
                cursor = ?outcome.cursor,
                "update poller stopped"
            ),
            _ => tracing::info!(
                reason = %outcome.reason,
                cursor = ?outcome.cursor,
                "update poller stopped"
            ),
        }

        *self
            .inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        self.inner.notify.notify_waiters();
        true
    }

    pub fn is_stopped(&self) -> bool {
        self.outcome().is_some()
    }

    pub fn outcome(&self) -> Option<PollOutcome> {
        self.inner
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Waits until the run records its outcome.
    pub async fn wait(&self) -> PollOutcome {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalStatus")
            .field("outcome", &self.outcome())
            .finish()
    }
}
