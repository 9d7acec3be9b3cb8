use crate::source::UpdateId;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Read-only mirror of the committed cursor.
///
/// Written only by the poll task after a batch is committed to the sink, so observers
/// never see a cursor for a batch that was not delivered.
#[derive(Debug)]
pub struct CursorTracker {
    value: AtomicI64,
    ready: AtomicBool,
}

impl CursorTracker {
    pub fn new(initial: Option<UpdateId>) -> Self {
        Self {
            value: AtomicI64::new(initial.unwrap_or(0)),
            ready: AtomicBool::new(initial.is_some()),
        }
    }

    pub fn reset(&self, initial: Option<UpdateId>) {
        self.value.store(initial.unwrap_or(0), Ordering::SeqCst);
        self.ready.store(initial.is_some(), Ordering::SeqCst);
    }

    pub fn mark_committed(&self, cursor: UpdateId) {
        self.value.store(cursor, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn current(&self) -> Option<UpdateId> {
        if self.ready.load(Ordering::SeqCst) {
            Some(self.value.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}
