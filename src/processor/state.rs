//! Run state and transition rules of the poll loop.

use crate::source::UpdateId;
use std::num::NonZeroU32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Polling,
    Backoff,
    Stopped,
}

/// Cursor and failure streak of a single run. Owned by value by the poll task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    cursor: Option<UpdateId>,
    consecutive_errors: u32,
}

impl RunState {
    pub fn new(initial_cursor: Option<UpdateId>) -> Self {
        Self {
            cursor: initial_cursor,
            consecutive_errors: 0,
        }
    }

    /// Offset for the next fetch.
    pub fn cursor(&self) -> Option<UpdateId> {
        self.cursor
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Applies a batch that was committed to the sink. `high_water` is the largest
    /// update id in that batch.
    ///
    /// Returns the new cursor. The cursor never moves backwards, even if the source
    /// replays ids below it.
    pub fn commit_batch(&mut self, high_water: UpdateId) -> UpdateId {
        let proposed = high_water.saturating_add(1);
        let next = match self.cursor {
            Some(current) if current > proposed => {
                tracing::warn!(
                    cursor = current,
                    high_water,
                    "source returned updates below the cursor; keeping cursor"
                );
                current
            }
            _ => proposed,
        };
        self.cursor = Some(next);
        self.consecutive_errors = 0;
        next
    }

    /// A fetch returned no updates. The failure streak ends; the cursor is untouched.
    pub fn record_empty(&mut self) {
        self.consecutive_errors = 0;
    }

    /// A fetch failed. Returns `Stopped` once `limit` back-to-back failures were seen,
    /// `Backoff` otherwise.
    pub fn record_failure(&mut self, limit: Option<NonZeroU32>) -> PollerState {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        match limit {
            Some(limit) if self.consecutive_errors >= limit.get() => PollerState::Stopped,
            _ => PollerState::Backoff,
        }
    }
}
