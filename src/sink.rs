//! Bounded, ordered hand-off of update batches from the poller to consumers.

pub(crate) mod batch_queue;
pub mod stream;

pub use stream::{channel, PublishOutcome, UpdateSink, UpdateStream};
