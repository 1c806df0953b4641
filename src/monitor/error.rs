use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("fetch failed for {channel}: {reason}")]
    FetchFailed { channel: String, reason: String },
    #[error("incompatible segments: sample rate {expected} Hz vs {actual} Hz")]
    IncompatibleSegments { expected: f64, actual: f64 },
    #[error("channel mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: String, actual: String },
    #[error("no samples within [{start}, {end})")]
    OutOfRange { start: f64, end: f64 },
    #[error("sample rate must be positive and finite, got {0}")]
    InvalidSampleRate(f64),
    #[error("span must be positive and finite, got {0}")]
    InvalidSpan(f64),
    #[error("timer interval must be greater than zero")]
    InvalidInterval,
    #[error("no data source registered under '{0}'")]
    UnknownSource(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to render plot: {0}")]
    Plot(String),
}

impl MonitorError {
    /// Errors that mean the cached segment cannot be stitched with the new
    /// fragment, so the merge falls back to a full-window fetch.
    pub fn is_incompatible(&self) -> bool {
        matches!(
            self,
            MonitorError::IncompatibleSegments { .. } | MonitorError::ChannelMismatch { .. }
        )
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for MonitorError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        MonitorError::Plot(format!("{value:?}"))
    }
}

impl From<image::ImageError> for MonitorError {
    fn from(value: image::ImageError) -> Self {
        MonitorError::Plot(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
