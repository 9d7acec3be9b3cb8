use anyhow::{anyhow, Error as AnyError};
use std::fmt;

/// Failure of a single fetch. The poller treats every instance as transient.
#[derive(Debug)]
pub struct SourceError {
    source: AnyError,
    api_code: Option<i64>,
    retry_after: Option<u64>,
}

impl SourceError {
    pub fn new(source: impl Into<AnyError>) -> Self {
        Self {
            source: source.into(),
            api_code: None,
            retry_after: None,
        }
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::new(AnyError::msg(message))
    }

    /// Error reported by the remote side inside an otherwise well-formed response.
    pub fn api(code: Option<i64>, description: impl Into<String>) -> Self {
        let description = description.into();
        Self {
            source: anyhow!("remote API error: {description}"),
            api_code: code,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after = seconds;
        self
    }

    pub fn api_code(&self) -> Option<i64> {
        self.api_code
    }

    /// Server-suggested wait in seconds, when the response carried one.
    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.api_code {
            Some(code) => write!(f, "update fetch failed ({code}): {}", self.source),
            None => write!(f, "update fetch failed: {}", self.source),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
