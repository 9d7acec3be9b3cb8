use crate::runtime::telemetry;
use crate::source::{FetchRequest, UpdateId};
use anyhow::{bail, Context, Result};
use std::env;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_LONG_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SINK_CAPACITY: usize = 100;
const DEFAULT_RETRY_DELAY_SECS: u64 = 3;

pub const ENV_INITIAL_OFFSET: &str = "POLLSTREAM_INITIAL_OFFSET";
pub const ENV_BATCH_LIMIT: &str = "POLLSTREAM_BATCH_LIMIT";
pub const ENV_LONG_POLL_SECS: &str = "POLLSTREAM_LONG_POLL_SECS";
pub const ENV_ALLOWED_UPDATES: &str = "POLLSTREAM_ALLOWED_UPDATES";
pub const ENV_SINK_CAPACITY: &str = "POLLSTREAM_SINK_CAPACITY";
pub const ENV_RETRY_DELAY_MS: &str = "POLLSTREAM_RETRY_DELAY_MS";
pub const ENV_MAX_RETRY_DELAY_MS: &str = "POLLSTREAM_MAX_RETRY_DELAY_MS";
pub const ENV_MAX_CONSECUTIVE_ERRORS: &str = "POLLSTREAM_MAX_CONSECUTIVE_ERRORS";
pub const ENV_METRICS_INTERVAL_SECS: &str = "POLLSTREAM_METRICS_INTERVAL_SECS";

/// Configuration of one poll run.
///
/// All instances must be constructed via [`PollerConfig::builder`], [`PollerConfig::new`] or
/// [`PollerConfig::from_env`] so invariants are validated before the poller observes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    initial_cursor: Option<UpdateId>,
    batch_limit: Option<u32>,
    long_poll_timeout: Duration,
    allowed_updates: Option<Vec<String>>,
    sink_capacity: usize,
    retry_delay: Duration,
    max_retry_delay: Option<Duration>,
    max_consecutive_errors: Option<NonZeroU32>,
    metrics_interval: Duration,
}

pub struct PollerConfigParams {
    pub initial_cursor: Option<UpdateId>,
    pub batch_limit: Option<u32>,
    pub long_poll_timeout: Duration,
    pub allowed_updates: Option<Vec<String>>,
    pub sink_capacity: usize,
    pub retry_delay: Duration,
    pub max_retry_delay: Option<Duration>,
    pub max_consecutive_errors: Option<NonZeroU32>,
    pub metrics_interval: Duration,
}

impl PollerConfig {
    /// Returns a builder where every option falls back to its default.
    pub fn builder() -> PollerConfigBuilder {
        PollerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values and validates it.
    pub fn new(params: PollerConfigParams) -> Result<Self> {
        let PollerConfigParams {
            initial_cursor,
            batch_limit,
            long_poll_timeout,
            allowed_updates,
            sink_capacity,
            retry_delay,
            max_retry_delay,
            max_consecutive_errors,
            metrics_interval,
        } = params;

        let config = Self {
            initial_cursor,
            batch_limit,
            long_poll_timeout,
            allowed_updates: allowed_updates.map(trimmed_strings),
            sink_capacity,
            retry_delay,
            max_retry_delay,
            max_consecutive_errors,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reads `POLLSTREAM_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`PollerConfig::from_env`] but resolves variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(offset) = parse_var::<UpdateId, _>(&lookup, ENV_INITIAL_OFFSET)? {
            builder = builder.initial_cursor(offset);
        }
        if let Some(limit) = parse_var::<u32, _>(&lookup, ENV_BATCH_LIMIT)? {
            builder = builder.batch_limit(limit);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_LONG_POLL_SECS)? {
            builder = builder.long_poll_timeout(Duration::from_secs(secs));
        }
        if let Some(raw) = read_var(&lookup, ENV_ALLOWED_UPDATES) {
            builder = builder.allowed_updates(raw.split(',').map(str::to_owned));
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, ENV_SINK_CAPACITY)? {
            builder = builder.sink_capacity(capacity);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_RETRY_DELAY_MS)? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_MAX_RETRY_DELAY_MS)? {
            builder = builder.max_retry_delay(Duration::from_millis(ms));
        }
        if let Some(limit) = parse_var::<u32, _>(&lookup, ENV_MAX_CONSECUTIVE_ERRORS)? {
            builder = builder.max_consecutive_errors(limit);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Cursor requested by the first fetch. `None` lets the source choose.
    pub fn initial_cursor(&self) -> Option<UpdateId> {
        self.initial_cursor
    }

    /// Per-response item cap forwarded to the source.
    pub fn batch_limit(&self) -> Option<u32> {
        self.batch_limit
    }

    /// How long one fetch may block server-side waiting for data.
    pub fn long_poll_timeout(&self) -> Duration {
        self.long_poll_timeout
    }

    /// Update kinds forwarded to the source as a filter.
    pub fn allowed_updates(&self) -> Option<&[String]> {
        self.allowed_updates.as_deref()
    }

    /// Maximum number of undelivered batches buffered in the sink.
    pub fn sink_capacity(&self) -> usize {
        self.sink_capacity
    }

    /// Sleep after a failed fetch.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Ceiling for the doubling retry delay. `None` keeps the delay fixed.
    pub fn max_retry_delay(&self) -> Option<Duration> {
        self.max_retry_delay
    }

    /// Number of back-to-back failures that stops the run. `None` retries forever.
    pub fn max_consecutive_errors(&self) -> Option<NonZeroU32> {
        self.max_consecutive_errors
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Request template for a fetch at `offset`.
    pub fn fetch_request(&self, offset: Option<UpdateId>) -> FetchRequest {
        FetchRequest::new(self.long_poll_timeout)
            .with_offset(offset)
            .with_limit(self.batch_limit)
            .with_allowed_updates(self.allowed_updates.clone())
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.batch_limit == Some(0) {
            bail!("batch_limit must be greater than 0 when set");
        }

        if let Some(allowed) = &self.allowed_updates {
            if allowed.iter().any(|kind| kind.trim().is_empty()) {
                bail!("allowed_updates cannot contain empty entries");
            }
        }

        if let Some(ceiling) = self.max_retry_delay {
            if ceiling < self.retry_delay {
                bail!(
                    "max_retry_delay ({ceiling:?}) must not be shorter than retry_delay ({:?})",
                    self.retry_delay
                );
            }
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            initial_cursor: None,
            batch_limit: None,
            long_poll_timeout: Duration::from_secs(DEFAULT_LONG_POLL_TIMEOUT_SECS),
            allowed_updates: None,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            max_retry_delay: None,
            max_consecutive_errors: None,
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PollerConfigBuilder {
    initial_cursor: Option<UpdateId>,
    batch_limit: Option<u32>,
    long_poll_timeout: Option<Duration>,
    allowed_updates: Option<Vec<String>>,
    sink_capacity: Option<usize>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    max_consecutive_errors: Option<NonZeroU32>,
    metrics_interval: Option<Duration>,
}

impl PollerConfigBuilder {
    pub fn initial_cursor(mut self, cursor: UpdateId) -> Self {
        self.initial_cursor = Some(cursor);
        self
    }

    pub fn batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn long_poll_timeout(mut self, timeout: Duration) -> Self {
        self.long_poll_timeout = Some(timeout);
        self
    }

    pub fn allowed_updates<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_updates = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    pub fn sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = Some(capacity);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, ceiling: Duration) -> Self {
        self.max_retry_delay = Some(ceiling);
        self
    }

    /// `0` means unlimited.
    pub fn max_consecutive_errors(mut self, limit: u32) -> Self {
        self.max_consecutive_errors = NonZeroU32::new(limit);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<PollerConfig> {
        let defaults = PollerConfig::default();
        let params = PollerConfigParams {
            initial_cursor: self.initial_cursor,
            batch_limit: self.batch_limit,
            long_poll_timeout: self.long_poll_timeout.unwrap_or(defaults.long_poll_timeout),
            allowed_updates: self.allowed_updates,
            sink_capacity: self.sink_capacity.unwrap_or(defaults.sink_capacity),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            max_retry_delay: self.max_retry_delay,
            max_consecutive_errors: self.max_consecutive_errors,
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        };

        PollerConfig::new(params)
    }
}

fn trimmed_strings(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|value| value.trim().to_owned())
        .collect()
}

fn read_var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    read_var(lookup, key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{key} has invalid value {raw:?}"))
        })
        .transpose()
}
