//! Poll loop orchestration: run state transitions, retry backoff, and the
//! run-scoped lifecycle around the poll task.

pub mod backoff;
pub mod lifecycle;
pub mod poller;
pub mod state;
