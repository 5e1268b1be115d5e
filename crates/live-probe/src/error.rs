use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("upstream api error {code}: {message}")]
    ApiError { code: i64, message: String },
    #[error("rate limited by upstream (code {0})")]
    RateLimited(i64),
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("process failed: {0}")]
    ProcessError(String),
    #[error("unsupported channel for {platform} probe: {channel}")]
    UnsupportedChannel {
        platform: &'static str,
        channel: String,
    },
    #[error("other: {0}")]
    Other(String),
}

impl ProbeError {
    /// Whether another attempt at the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_)
            | Self::IoError(_)
            | Self::JsonError(_)
            | Self::RateLimited(_)
            | Self::Timeout(_)
            | Self::ProcessError(_) => true,
            Self::ApiError { .. } | Self::UnsupportedChannel { .. } | Self::Other(_) => false,
        }
    }
}
