pub mod processor;
pub mod runtime;
pub mod sink;
pub mod source;

pub use processor::poller::UpdatePoller;
pub use processor::state::{PollerState, RunState};
pub use runtime::config::{PollerConfig, PollerConfigBuilder, PollerConfigParams};
pub use runtime::progress::CursorTracker;
pub use runtime::runner::Runner;
pub use runtime::status::{PollOutcome, StopReason, TerminalStatus};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use sink::{channel, PublishOutcome, UpdateSink, UpdateStream};
pub use source::{
    batch_high_water, decode_updates_response, FetchRequest, RawUpdate, SourceError,
    SourceFuture, Update, UpdateId, UpdateSource,
};
