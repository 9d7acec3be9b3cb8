use super::update::UpdateId;
use std::time::Duration;

/// Arguments of a single `fetch_updates` call.
///
/// `limit` and `allowed_updates` are passed through untouched; the poller only ever
/// changes `offset` between calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub offset: Option<UpdateId>,
    pub limit: Option<u32>,
    pub timeout: Duration,
    pub allowed_updates: Option<Vec<String>>,
}

impl FetchRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            offset: None,
            limit: None,
            timeout,
            allowed_updates: None,
        }
    }

    pub fn with_offset(mut self, offset: Option<UpdateId>) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_allowed_updates(mut self, allowed: Option<Vec<String>>) -> Self {
        self.allowed_updates = allowed;
        self
    }

    /// Long-poll timeout in whole seconds, as most remote APIs expect it.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }
}
