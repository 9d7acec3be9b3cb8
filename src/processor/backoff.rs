use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Delay applied after a failed fetch.
///
/// Without a ceiling every retry waits `initial_delay`. With a ceiling the delay doubles
/// per consecutive failure, starting at `initial_delay` and capped at the ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryBackoff {
    pub initial_delay: Duration,
    pub max_delay: Option<Duration>,
}

impl RetryBackoff {
    pub(crate) fn new(initial_delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            initial_delay,
            max_delay,
        }
    }

    /// Delay before the retry that follows the `consecutive_errors`-th failure.
    pub(crate) fn delay_for(&self, consecutive_errors: u32) -> Duration {
        let Some(max_delay) = self.max_delay else {
            return self.initial_delay;
        };

        let mut delay = self.initial_delay;
        for _ in 1..consecutive_errors {
            let next = next_backoff(delay, max_delay);
            if next == delay {
                break;
            }
            delay = next;
        }
        delay
    }
}

pub(crate) enum SleepOutcome {
    Elapsed,
    Cancelled,
}

pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> SleepOutcome {
    if delay.is_zero() {
        yield_now().await;
        return if cancellation.is_cancelled() {
            SleepOutcome::Cancelled
        } else {
            SleepOutcome::Elapsed
        };
    }

    tokio::select! {
        _ = cancellation.cancelled() => SleepOutcome::Cancelled,
        _ = sleep(delay) => SleepOutcome::Elapsed,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
