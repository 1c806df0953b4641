use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::monitor::error::{MonitorError, Result};

/// Half-open visible interval `[start, end)` in seconds since the epoch.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    /// Window for the given reference time.
    ///
    /// With a pause anchor the window is fixed at `[anchor, anchor + span)`,
    /// otherwise it trails `now`.
    pub fn current(now: f64, span: f64, pause_anchor: Option<f64>) -> Self {
        match pause_anchor {
            Some(anchor) => TimeWindow {
                start: anchor,
                end: anchor + span,
            },
            None => TimeWindow {
                start: now - span,
                end: now,
            },
        }
    }

    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

/// Default window spans: 15s, 30s, 1m, 2m, 5m, 10m, 20m, 30m, 1h, 2h.
pub const DEFAULT_SPANS: [f64; 10] = [
    15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0,
];

pub(crate) fn validate_span(seconds: f64) -> Result<f64> {
    if seconds.is_finite() && seconds > 0.0 {
        Ok(seconds)
    } else {
        Err(MonitorError::InvalidSpan(seconds))
    }
}

/// Ordered set of allowed spans plus the active one.
#[derive(Clone, Debug)]
pub struct SpanRegistry {
    spans: Vec<f64>,
    current: f64,
}

impl SpanRegistry {
    pub fn new(spans: &[f64], current: f64) -> Result<Self> {
        let mut spans = spans
            .iter()
            .map(|&s| validate_span(s))
            .collect::<Result<Vec<f64>>>()?;
        spans.sort_by(|a, b| a.total_cmp(b));
        spans.dedup();
        Ok(Self {
            spans,
            current: validate_span(current)?,
        })
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn spans(&self) -> &[f64] {
        &self.spans
    }

    /// Select an arbitrary span; it does not have to be one of the registered steps.
    pub fn set(&mut self, seconds: f64) -> Result<f64> {
        self.current = validate_span(seconds)?;
        Ok(self.current)
    }

    /// Move to the next wider registered span; stays put at the widest.
    pub fn next(&mut self) -> f64 {
        if let Some(&wider) = self.spans.iter().find(|&&s| s > self.current) {
            self.current = wider;
        }
        self.current
    }

    /// Move to the next narrower registered span; stays put at the narrowest.
    pub fn previous(&mut self) -> f64 {
        if let Some(&narrower) = self.spans.iter().rev().find(|&&s| s < self.current) {
            self.current = narrower;
        }
        self.current
    }
}

impl Default for SpanRegistry {
    fn default() -> Self {
        Self {
            spans: DEFAULT_SPANS.to_vec(),
            current: 60.0,
        }
    }
}

/// Source of "now" for window computation.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to. Used for replays and tests.
#[derive(Debug)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(now: f64) -> Self {
        Self {
            bits: AtomicU64::new(now.to_bits()),
        }
    }

    pub fn set(&self, now: f64) {
        self.bits.store(now.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}
