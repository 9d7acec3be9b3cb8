use super::batch_queue::{BatchQueue, PushOutcome};
use futures::stream::{self, Stream};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Creates a sink/stream pair buffering at most `capacity` undelivered batches.
///
/// A capacity of zero makes every publish a synchronous hand-off to a consumer.
pub fn channel<U>(capacity: usize) -> (UpdateSink<U>, UpdateStream<U>) {
    let queue = Arc::new(BatchQueue::new(capacity));
    let stream = UpdateStream::attach(queue.clone());
    (UpdateSink { queue }, stream)
}

/// Result of [`UpdateSink::publish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The batch is committed to the sink. `waited` reports whether the sink was full.
    Delivered { waited: bool },
    /// Cancellation fired while waiting for room; the batch was dropped.
    Cancelled,
    /// The sink was closed or every stream handle was dropped; the batch was dropped.
    Disconnected,
}

/// Producer half. Owned by exactly one poll task.
pub struct UpdateSink<U> {
    queue: Arc<BatchQueue<Vec<U>>>,
}

impl<U> UpdateSink<U> {
    pub async fn publish(&self, batch: Vec<U>, cancellation: &CancellationToken) -> PublishOutcome {
        match self.queue.push(batch, cancellation).await {
            PushOutcome::Enqueued { waited } => PublishOutcome::Delivered { waited },
            PushOutcome::Cancelled(_) => PublishOutcome::Cancelled,
            PushOutcome::Disconnected(_) | PushOutcome::Closed(_) => PublishOutcome::Disconnected,
        }
    }

    /// Ends the stream once buffered batches are drained. Returns `true` only for the
    /// call that actually closed the sink.
    pub fn close(&self) -> bool {
        self.queue.close()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub async fn len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of live [`UpdateStream`] handles.
    pub fn receiver_count(&self) -> usize {
        self.queue.receiver_count()
    }

    pub(crate) fn queue(&self) -> Arc<BatchQueue<Vec<U>>> {
        self.queue.clone()
    }
}

impl<U> Drop for UpdateSink<U> {
    fn drop(&mut self) {
        self.queue.close();
    }
}

impl<U> fmt::Debug for UpdateSink<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSink")
            .field("capacity", &self.queue.capacity())
            .field("receivers", &self.queue.receiver_count())
            .finish()
    }
}

/// Consumer half. Clones share the same buffer; each batch is received by one handle.
pub struct UpdateStream<U> {
    queue: Arc<BatchQueue<Vec<U>>>,
}

impl<U> UpdateStream<U> {
    fn attach(queue: Arc<BatchQueue<Vec<U>>>) -> Self {
        queue.add_receiver();
        Self { queue }
    }

    /// Waits for the next batch. Returns `None` once the sink is closed and drained.
    pub async fn recv(&self) -> Option<Vec<U>> {
        self.queue.pop().await
    }

    /// Returns the next buffered batch without waiting.
    pub async fn try_recv(&self) -> Option<Vec<U>> {
        self.queue.try_pop().await
    }

    /// `true` once the producer closed the sink. Buffered batches may still be pending.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Number of batches buffered and not yet received.
    pub async fn len(&self) -> usize {
        self.queue.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Converts this handle into a [`Stream`] of batches.
    pub fn into_stream(self) -> impl Stream<Item = Vec<U>> {
        stream::unfold(self, |handle| async move {
            let batch = handle.recv().await?;
            Some((batch, handle))
        })
    }
}

impl<U> Clone for UpdateStream<U> {
    fn clone(&self) -> Self {
        Self::attach(self.queue.clone())
    }
}

impl<U> Drop for UpdateStream<U> {
    fn drop(&mut self) {
        self.queue.remove_receiver();
    }
}

impl<U> fmt::Debug for UpdateStream<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateStream")
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}
