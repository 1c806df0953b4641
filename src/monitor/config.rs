use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::monitor::error::{MonitorError, Result};
use crate::monitor::window::DEFAULT_SPANS;

/// Start-up settings for one monitor. Runtime changes go through the
/// scheduler's control methods.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Initial visible span in seconds.
    pub span_seconds: f64,
    /// Steps offered by span up/down navigation.
    pub spans: Vec<f64>,
    pub slide_interval_ms: u64,
    pub refresh_interval_ms: u64,
    /// Incremental fetches reach this far back over already cached data.
    pub fetch_overlap_seconds: f64,
    /// Largest hole between cached and fetched data that is still stitched.
    pub adjacency_tolerance_seconds: f64,
    /// How long `stop()` waits for an in-flight refresh before abandoning it.
    pub shutdown_timeout_ms: u64,
    /// Channels fetched in parallel within one refresh cycle.
    pub max_concurrent_fetches: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            span_seconds: 60.0,
            spans: DEFAULT_SPANS.to_vec(),
            slide_interval_ms: 250,
            refresh_interval_ms: 2000,
            fetch_overlap_seconds: 10.0,
            adjacency_tolerance_seconds: 10.0,
            shutdown_timeout_ms: 2000,
            max_concurrent_fetches: 8,
        }
    }
}

impl MonitorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: MonitorConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for &span in std::iter::once(&self.span_seconds).chain(&self.spans) {
            if !(span.is_finite() && span > 0.0) {
                return Err(MonitorError::InvalidSpan(span));
            }
        }
        if self.slide_interval_ms == 0 || self.refresh_interval_ms == 0 {
            return Err(MonitorError::InvalidInterval);
        }
        if !(self.fetch_overlap_seconds.is_finite() && self.fetch_overlap_seconds >= 0.0) {
            return Err(MonitorError::Config(format!(
                "fetch_overlap_seconds must be non-negative, got {}",
                self.fetch_overlap_seconds
            )));
        }
        if !(self.adjacency_tolerance_seconds.is_finite() && self.adjacency_tolerance_seconds >= 0.0)
        {
            return Err(MonitorError::Config(format!(
                "adjacency_tolerance_seconds must be non-negative, got {}",
                self.adjacency_tolerance_seconds
            )));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(MonitorError::Config(
                "max_concurrent_fetches must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.spans.first(), Some(&15.0));
        assert_eq!(config.spans.last(), Some(&7200.0));
        assert!(config.slide_interval_ms < config.refresh_interval_ms);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config =
            MonitorConfig::from_json_str(r#"{ "span_seconds": 120, "refresh_interval_ms": 500 }"#)
                .unwrap();
        assert_eq!(config.span_seconds, 120.0);
        assert_eq!(config.refresh_interval_ms, 500);
        assert_eq!(config.slide_interval_ms, 250);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "span_seconds": 0 }"#),
            Err(MonitorError::InvalidSpan(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "slide_interval_ms": 0 }"#),
            Err(MonitorError::InvalidInterval)
        ));
        assert!(matches!(
            MonitorConfig::from_json_str(r#"{ "max_concurrent_fetches": 0 }"#),
            Err(MonitorError::Config(_))
        ));
        assert!(matches!(
            MonitorConfig::from_json_str("not json"),
            Err(MonitorError::Json(_))
        ));
    }

    #[test]
    fn round_trips_through_json() {
        let config = MonitorConfig {
            span_seconds: 300.0,
            ..MonitorConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(MonitorConfig::from_json_str(&text).unwrap(), config);
    }
}
