//! Run-scoped cancellation, terminal status, and the metrics reporter for `UpdatePoller`.

use crate::runtime::status::TerminalStatus;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sink::batch_queue::BatchQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct LifecycleHandles {
    pub run_token: CancellationToken,
    /// Child of `run_token`; also cancelled by the poll task when the run ends on its own.
    pub reporter_token: CancellationToken,
    status: TerminalStatus,
    metrics_handle: Option<JoinHandle<()>>,
}

pub(crate) struct LifecycleSpawnParams<'a, T> {
    pub shutdown_root: &'a CancellationToken,
    pub telemetry: Arc<Telemetry>,
    pub queue: Arc<BatchQueue<T>>,
    pub metrics_interval: Duration,
}

impl LifecycleHandles {
    pub(crate) fn spawn<T: Send + 'static>(params: LifecycleSpawnParams<'_, T>) -> Self {
        let LifecycleSpawnParams {
            shutdown_root,
            telemetry,
            queue,
            metrics_interval,
        } = params;

        let run_token = shutdown_root.child_token();
        let reporter_token = run_token.child_token();
        let metrics_handle = telemetry::spawn_metrics_reporter(
            telemetry,
            queue,
            reporter_token.clone(),
            metrics_interval,
        );

        Self {
            run_token,
            reporter_token,
            status: TerminalStatus::new(),
            metrics_handle: Some(metrics_handle),
        }
    }

    pub(crate) fn status(&self) -> TerminalStatus {
        self.status.clone()
    }

    pub(crate) async fn shutdown(mut self) {
        self.reporter_token.cancel();
        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
    }
}
