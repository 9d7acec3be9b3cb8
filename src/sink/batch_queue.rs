use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

struct QueueState<T> {
    items: VecDeque<T>,
    pushed: u64,
    taken: u64,
}

/// Result of [`BatchQueue::push`].
#[derive(Debug)]
pub(crate) enum PushOutcome<T> {
    /// `waited` is set when the producer had to wait for room, or for a rendezvous
    /// consumer to take the item.
    Enqueued { waited: bool },
    Cancelled(T),
    Disconnected(T),
    Closed(T),
}

/// FIFO queue bounded by item count, with a single producer and any number of consumers.
///
/// A capacity of zero behaves as a rendezvous: the slot holds at most one item and
/// `push` returns only once a consumer has taken it.
pub(crate) struct BatchQueue<T> {
    state: Mutex<QueueState<T>>,
    notify: Notify,
    closed: AtomicBool,
    receivers: AtomicUsize,
    capacity: usize,
}

impl<T> BatchQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1_024)),
                pushed: 0,
                taken: 0,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            receivers: AtomicUsize::new(0),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    fn slots(&self) -> usize {
        self.capacity.max(1)
    }

    /// Enqueues `item`, waiting for room while the queue is full.
    ///
    /// An item that fits is enqueued even if `cancellation` has already fired; the token
    /// only interrupts a wait for room.
    pub(crate) async fn push(&self, item: T, cancellation: &CancellationToken) -> PushOutcome<T> {
        let mut waited = false;
        let seq = loop {
            let notified = self.notify.notified();
            let mut state = self.state.lock().await;
            if self.is_closed() {
                return PushOutcome::Closed(item);
            }
            if self.receivers.load(Ordering::SeqCst) == 0 {
                return PushOutcome::Disconnected(item);
            }
            if state.items.len() < self.slots() {
                state.items.push_back(item);
                state.pushed += 1;
                let seq = state.pushed;
                drop(state);
                self.notify.notify_waiters();
                break seq;
            }
            drop(state);
            waited = true;

            tokio::select! {
                _ = notified => {}
                _ = cancellation.cancelled() => return PushOutcome::Cancelled(item),
            }
        };

        if self.capacity == 0 && self.wait_until_taken(seq, cancellation).await {
            waited = true;
        }

        PushOutcome::Enqueued { waited }
    }

    /// Returns `true` if the producer had to suspend before the item was taken.
    async fn wait_until_taken(&self, seq: u64, cancellation: &CancellationToken) -> bool {
        let mut suspended = false;
        loop {
            let notified = self.notify.notified();
            {
                let state = self.state.lock().await;
                if state.taken >= seq || self.is_closed() {
                    return suspended;
                }
            }
            if self.receivers.load(Ordering::SeqCst) == 0 {
                return suspended;
            }
            suspended = true;
            tokio::select! {
                _ = notified => {}
                _ = cancellation.cancelled() => return suspended,
            }
        }
    }

    /// Takes the oldest item, waiting while the queue is empty. Returns `None` once the
    /// queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    state.taken += 1;
                    drop(state);
                    self.notify.notify_waiters();
                    return Some(item);
                }
                if self.is_closed() {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub(crate) async fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock().await;
        let item = state.items.pop_front();
        if item.is_some() {
            state.taken += 1;
            drop(state);
            self.notify.notify_waiters();
        }
        item
    }

    /// Marks the queue closed. Returns `true` only for the call that performed the close.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify.notify_waiters();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub(crate) fn add_receiver(&self) {
        self.receivers.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn remove_receiver(&self) {
        if self.receivers.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub(crate) fn receiver_count(&self) -> usize {
        self.receivers.load(Ordering::SeqCst)
    }
}
