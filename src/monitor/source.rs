use std::collections::{HashMap, VecDeque};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread;
use std::time::Duration;

use log::info;
use rand::Rng;

use crate::monitor::config::MonitorConfig;
use crate::monitor::error::{MonitorError, Result};
use crate::monitor::scheduler::RefreshScheduler;
use crate::monitor::segment::Segment;
use crate::monitor::sink::RenderSink;
use crate::monitor::window::Clock;

/// Provider of waveform data for named channels.
///
/// Implementations may block on I/O; they are only ever called from refresh
/// workers, never from the slide path.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Samples for `channel` within `[start, end)`. `Ok(None)` means the
    /// provider has nothing for that range.
    fn fetch(&self, channel: &str, start: f64, end: f64) -> Result<Option<Segment>>;

    fn close(&self) {}
}

/// One recorded call to [`ManualSource::fetch`].
#[derive(Clone, Debug, PartialEq)]
pub struct FetchCall {
    pub channel: String,
    pub start: f64,
    pub end: f64,
}

enum Scripted {
    Answer(Option<Segment>),
    Failure(String),
}

/// Source that replays scripted answers per channel and records every call.
/// Useful for tests and deterministic playback.
pub struct ManualSource {
    name: String,
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<FetchCall>>,
    closed: AtomicBool,
}

impl ManualSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn push_segment(&self, channel: &str, segment: Segment) {
        self.push(channel, Scripted::Answer(Some(segment)));
    }

    pub fn push_none(&self, channel: &str) {
        self.push(channel, Scripted::Answer(None));
    }

    pub fn push_failure(&self, channel: &str, reason: impl Into<String>) {
        self.push(channel, Scripted::Failure(reason.into()));
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn push(&self, channel: &str, answer: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_string())
            .or_default()
            .push_back(answer);
    }
}

impl DataSource for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, channel: &str, start: f64, end: f64) -> Result<Option<Segment>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FetchCall {
                channel: channel.to_string(),
                start,
                end,
            });
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(channel)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(Scripted::Answer(answer)) => Ok(answer),
            Some(Scripted::Failure(reason)) => Err(MonitorError::FetchFailed {
                channel: channel.to_string(),
                reason,
            }),
            None => Ok(None),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Generates sine-plus-noise traces on a fixed sample grid, never past "now".
pub struct SyntheticSource {
    name: String,
    sample_rate: f64,
    amplitude: f64,
    noise: f64,
    latency: Duration,
    failure_rate: f64,
    clock: Arc<dyn Clock>,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, sample_rate: f64, clock: Arc<dyn Clock>) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(MonitorError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            name: name.into(),
            sample_rate,
            amplitude: 1000.0,
            noise: 50.0,
            latency: Duration::ZERO,
            failure_rate: 0.0,
            clock,
        })
    }

    /// Sleep this long on every fetch, like a slow wave server.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability in `[0, 1]` that a fetch fails with a transport error.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn frequency_for(channel: &str) -> f64 {
        let hash = channel
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        0.5 + (hash % 250) as f64 / 100.0
    }
}

impl DataSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, channel: &str, start: f64, end: f64) -> Result<Option<Segment>> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let mut rng = rand::thread_rng();
        if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            return Err(MonitorError::FetchFailed {
                channel: channel.to_string(),
                reason: "simulated transport failure".into(),
            });
        }

        let end = end.min(self.clock.now());
        let first = (start * self.sample_rate).ceil() as i64;
        let last = (end * self.sample_rate).ceil() as i64;
        if last <= first {
            return Ok(None);
        }
        let freq = Self::frequency_for(channel);
        let samples = (first..last)
            .map(|i| {
                let t = i as f64 / self.sample_rate;
                let jitter = if self.noise > 0.0 {
                    rng.gen_range(-self.noise..self.noise)
                } else {
                    0.0
                };
                self.amplitude * (2.0 * PI * freq * t).sin() + jitter
            })
            .collect();
        Segment::new(
            channel,
            first as f64 / self.sample_rate,
            self.sample_rate,
            samples,
        )
        .map(Some)
    }
}

/// Named data sources owned by the application. Each monitor is built
/// against exactly one of them.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Arc<dyn DataSource>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under its own name, closing any source it replaces.
    pub fn register(&self, source: Arc<dyn DataSource>) {
        let name = source.name().to_string();
        let previous = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), source);
        if let Some(previous) = previous {
            info!("replacing data source '{name}'");
            previous.close();
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn DataSource>> {
        self.sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| MonitorError::UnknownSource(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Unregister and close a source.
    pub fn remove(&self, name: &str) -> Result<()> {
        let source = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| MonitorError::UnknownSource(name.to_string()))?;
        source.close();
        Ok(())
    }

    pub fn close_all(&self) {
        let drained: Vec<_> = self
            .sources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (name, source) in drained {
            info!("closing data source '{name}'");
            source.close();
        }
    }

    /// Build a monitor bound to the named source.
    pub fn monitor(
        &self,
        name: &str,
        sink: Arc<dyn RenderSink>,
        config: MonitorConfig,
    ) -> Result<RefreshScheduler> {
        RefreshScheduler::new(self.get(name)?, sink, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::sink::channel_sink;
    use crate::monitor::window::ManualClock;

    #[test]
    fn manual_source_replays_script_in_order() {
        let source = ManualSource::new("test");
        let seg = Segment::new("A", 0.0, 1.0, vec![1.0, 2.0]).unwrap();
        source.push_segment("A", seg.clone());
        source.push_failure("A", "timeout");

        assert_eq!(source.fetch("A", 0.0, 2.0).unwrap(), Some(seg));
        assert!(matches!(
            source.fetch("A", 0.0, 2.0),
            Err(MonitorError::FetchFailed { .. })
        ));
        assert_eq!(source.fetch("A", 0.0, 2.0).unwrap(), None);
        assert_eq!(source.fetch("B", 5.0, 6.0).unwrap(), None);
        assert_eq!(source.call_count(), 4);
        assert_eq!(
            source.calls()[3],
            FetchCall {
                channel: "B".into(),
                start: 5.0,
                end: 6.0
            }
        );
    }

    #[test]
    fn synthetic_source_stays_on_grid_and_before_now() {
        let clock = Arc::new(ManualClock::new(1000.0));
        let source = SyntheticSource::new("synthetic", 100.0, clock).unwrap();
        let seg = source.fetch("AV.OKCF.--.EHZ", 990.005, 1010.0).unwrap().unwrap();
        assert!((seg.start_time() - 990.01).abs() < 1e-9);
        assert!(seg.end_time() <= 1000.0 + 1e-9);
        assert_eq!(seg.len(), 999);
        assert!(source.fetch("AV.OKCF.--.EHZ", 1001.0, 1010.0).unwrap().is_none());
    }

    #[test]
    fn synthetic_source_can_always_fail() {
        let clock = Arc::new(ManualClock::new(1000.0));
        let source = SyntheticSource::new("flaky", 10.0, clock)
            .unwrap()
            .with_failure_rate(1.0);
        assert!(source.fetch("A", 990.0, 1000.0).is_err());
    }

    #[test]
    fn registry_hands_out_and_closes_sources() {
        let registry = SourceRegistry::new();
        let first = Arc::new(ManualSource::new("winston"));
        registry.register(first.clone());
        assert_eq!(registry.names(), vec!["winston".to_string()]);
        assert_eq!(registry.get("winston").unwrap().name(), "winston");

        let second = Arc::new(ManualSource::new("winston"));
        registry.register(second.clone());
        assert!(first.is_closed());
        assert!(!second.is_closed());

        registry.remove("winston").unwrap();
        assert!(second.is_closed());
        assert!(matches!(
            registry.get("winston"),
            Err(MonitorError::UnknownSource(_))
        ));
        assert!(registry.remove("winston").is_err());
    }

    #[test]
    fn registry_builds_monitor_for_named_source() {
        let registry = SourceRegistry::new();
        registry.register(Arc::new(ManualSource::new("seedlink")));
        let (sink, _frames) = channel_sink();
        assert!(registry
            .monitor("seedlink", Arc::new(sink.clone()), MonitorConfig::default())
            .is_ok());
        assert!(registry
            .monitor("missing", Arc::new(sink), MonitorConfig::default())
            .is_err());

        let extra = Arc::new(ManualSource::new("fdsn"));
        registry.register(extra.clone());
        registry.close_all();
        assert!(extra.is_closed());
        assert!(registry.names().is_empty());
    }
}
