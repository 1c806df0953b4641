//! Drives a monitor: a fast local "slide" that republishes cached data for the
//! current window and a slower "refresh" that fetches, stitches and caches new
//! samples per channel.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::monitor::cache::ChannelCache;
use crate::monitor::config::MonitorConfig;
use crate::monitor::error::{MonitorError, Result};
use crate::monitor::merger::{MergeOutcome, SegmentMerger};
use crate::monitor::segment::Segment;
use crate::monitor::sink::RenderSink;
use crate::monitor::source::DataSource;
use crate::monitor::window::{validate_span, Clock, SpanRegistry, SystemClock, TimeWindow};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Stopped,
    Running,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another cycle was already in flight; nothing was done.
    Skipped,
    Completed(CycleSummary),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChannelHealth {
    pub channel: String,
    pub cached_samples: Option<usize>,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    /// Clock time of the last refresh that changed the cache.
    pub last_update: Option<f64>,
    pub last_error: Option<String>,
}

impl ChannelHealth {
    fn new(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            cached_samples: None,
            consecutive_failures: 0,
            total_failures: 0,
            last_update: None,
            last_error: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorReport {
    pub source: String,
    pub state: SchedulerState,
    pub paused: bool,
    pub span: f64,
    pub window: TimeWindow,
    pub refreshing: bool,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub channels: Vec<ChannelHealth>,
}

enum ChannelResult {
    Updated,
    Unchanged,
    Failed(String),
}

struct ViewState {
    spans: SpanRegistry,
    pause_anchor: Option<f64>,
}

/// Clears the in-flight flag when the cycle ends, even by panic.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State shared between the control surface and the ticker threads.
struct Core {
    source: Arc<dyn DataSource>,
    sink: Arc<dyn RenderSink>,
    clock: Arc<dyn Clock>,
    cache: ChannelCache,
    merger: SegmentMerger,
    view: RwLock<ViewState>,
    in_flight: AtomicBool,
    cycles_completed: AtomicU64,
    cycles_skipped: AtomicU64,
    health: Mutex<HashMap<String, ChannelHealth>>,
    max_concurrent_fetches: usize,
}

impl Core {
    fn window(&self) -> TimeWindow {
        let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
        TimeWindow::current(self.clock.now(), view.spans.current(), view.pause_anchor)
    }

    fn slide(&self) -> TimeWindow {
        let window = self.window();
        for channel in self.cache.channels() {
            let Some(segment) = self.cache.get(&channel) else {
                continue;
            };
            if segment.is_empty() {
                continue;
            }
            if segment.is_within(&window) {
                self.sink.publish(&channel, &segment, &window);
                continue;
            }
            match segment.subset_window(&window) {
                Ok(visible) => self.sink.publish(&channel, &Arc::new(visible), &window),
                Err(MonitorError::OutOfRange { .. }) => {}
                Err(e) => debug!("{channel}: nothing to publish: {e}"),
            }
        }
        window
    }

    fn refresh(&self) -> RefreshOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
            debug!("{}: refresh already in flight, skipping tick", self.source.name());
            return RefreshOutcome::Skipped;
        };
        let window = self.window();
        let channels = self.cache.channels();

        // Shared queue: a slow channel never delays the ones behind it.
        let next = AtomicUsize::new(0);
        let results = Mutex::new(Vec::with_capacity(channels.len()));
        let workers = self.max_concurrent_fetches.min(channels.len());
        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| {
                    while let Some(channel) = channels.get(next.fetch_add(1, Ordering::Relaxed)) {
                        let result = self.refresh_channel(channel, window);
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push((channel.clone(), result));
                    }
                });
            }
        });

        let results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
        let summary = self.record(results);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "{}: refresh done ({} updated, {} unchanged, {} failed)",
            self.source.name(),
            summary.updated,
            summary.unchanged,
            summary.failed
        );
        RefreshOutcome::Completed(summary)
    }

    fn refresh_channel(&self, channel: &str, window: TimeWindow) -> ChannelResult {
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            let cached = self.cache.get(channel);
            self.merger.merge(cached.as_deref(), &window, |start, end| {
                self.source.fetch(channel, start, end)
            })
        }));
        match attempt {
            Ok(Ok(MergeOutcome::Replaced(segment))) => {
                if self.cache.put(channel, segment) {
                    ChannelResult::Updated
                } else {
                    ChannelResult::Unchanged
                }
            }
            Ok(Ok(MergeOutcome::Unchanged)) => ChannelResult::Unchanged,
            Ok(Err(e)) => {
                warn!("{channel}: refresh failed, keeping cached data: {e}");
                ChannelResult::Failed(e.to_string())
            }
            Err(_) => {
                error!("{channel}: refresh panicked, keeping cached data");
                ChannelResult::Failed("refresh panicked".into())
            }
        }
    }

    fn record(&self, results: Vec<(String, ChannelResult)>) -> CycleSummary {
        let now = self.clock.now();
        let mut summary = CycleSummary::default();
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        for (channel, result) in results {
            // Deregistered while the cycle was running.
            let Some(entry) = health.get_mut(&channel) else {
                continue;
            };
            match result {
                ChannelResult::Updated => {
                    summary.updated += 1;
                    entry.consecutive_failures = 0;
                    entry.last_update = Some(now);
                    entry.last_error = None;
                }
                ChannelResult::Unchanged => {
                    summary.unchanged += 1;
                    entry.consecutive_failures = 0;
                }
                ChannelResult::Failed(reason) => {
                    summary.failed += 1;
                    entry.consecutive_failures += 1;
                    entry.total_failures += 1;
                    entry.last_error = Some(reason);
                }
            }
        }
        summary
    }
}

enum TickerCommand {
    Reschedule(Duration),
    Stop,
}

/// Signals the owner when a ticker thread exits, including by unwinding.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Periodic task on its own thread. Ticks missed while a tick is running are
/// collapsed into the next one, never queued.
struct Ticker {
    name: &'static str,
    control: Sender<TickerCommand>,
    exited: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Ticker {
    fn spawn<F>(
        name: &'static str,
        period: Duration,
        first_delay: Duration,
        mut tick: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let (control, commands) = mpsc::channel();
        let (exit_tx, exited) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(format!("seismon-{name}"))
            .spawn(move || {
                let _exit = ExitSignal(exit_tx);
                let mut period = period;
                let mut next = Instant::now() + first_delay;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match commands.recv_timeout(wait) {
                        Ok(TickerCommand::Reschedule(p)) => {
                            period = p;
                            next = Instant::now() + period;
                        }
                        Ok(TickerCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if panic::catch_unwind(AssertUnwindSafe(&mut tick)).is_err() {
                                error!("{name} tick panicked");
                            }
                            next = Instant::now() + period;
                        }
                    }
                }
            })?;
        Ok(Self {
            name,
            control,
            exited,
            handle,
        })
    }

    fn reschedule(&self, period: Duration) {
        let _ = self.control.send(TickerCommand::Reschedule(period));
    }

    fn request_stop(&self) {
        let _ = self.control.send(TickerCommand::Stop);
    }

    /// Wait until `deadline` for the thread to exit; detach it otherwise.
    fn finish(self, deadline: Instant) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.exited.recv_timeout(remaining) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("{} ticker still busy at shutdown, abandoning it", self.name);
            }
        }
    }
}

struct Workers {
    slide: Ticker,
    refresh: Ticker,
}

/// One live monitor over one data source.
///
/// All methods take `&self`; the scheduler can be shared behind an `Arc`
/// between the UI and other threads.
pub struct RefreshScheduler {
    core: Arc<Core>,
    slide_interval_ms: AtomicU64,
    refresh_interval_ms: AtomicU64,
    shutdown_timeout: Duration,
    workers: Mutex<Option<Workers>>,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn RenderSink>,
        config: MonitorConfig,
    ) -> Result<Self> {
        Self::with_clock(source, sink, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        source: Arc<dyn DataSource>,
        sink: Arc<dyn RenderSink>,
        config: MonitorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let spans = SpanRegistry::new(&config.spans, config.span_seconds)?;
        let core = Core {
            source,
            sink,
            clock,
            cache: ChannelCache::new(),
            merger: SegmentMerger::new(
                config.fetch_overlap_seconds,
                config.adjacency_tolerance_seconds,
            ),
            view: RwLock::new(ViewState {
                spans,
                pause_anchor: None,
            }),
            in_flight: AtomicBool::new(false),
            cycles_completed: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
            health: Mutex::new(HashMap::new()),
            max_concurrent_fetches: config.max_concurrent_fetches,
        };
        Ok(Self {
            core: Arc::new(core),
            slide_interval_ms: AtomicU64::new(config.slide_interval_ms),
            refresh_interval_ms: AtomicU64::new(config.refresh_interval_ms),
            shutdown_timeout: config.shutdown_timeout(),
            workers: Mutex::new(None),
        })
    }

    pub fn source_name(&self) -> &str {
        self.core.source.name()
    }

    /// Start showing a channel. Returns false if it was already registered.
    pub fn register_channel(&self, channel: &str) -> bool {
        let mut health = self.core.health.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.core.cache.register(channel) {
            return false;
        }
        health.insert(channel.to_string(), ChannelHealth::new(channel));
        info!("{}: registered channel {channel}", self.source_name());
        true
    }

    /// Stop showing a channel and drop its cached data.
    pub fn deregister_channel(&self, channel: &str) -> bool {
        let mut health = self.core.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.remove(channel);
        if !self.core.cache.contains(channel) {
            return false;
        }
        self.core.cache.remove(channel);
        info!("{}: deregistered channel {channel}", self.source_name());
        true
    }

    pub fn channels(&self) -> Vec<String> {
        self.core.cache.channels()
    }

    /// Latest cached segment for a channel, unclipped.
    pub fn cached(&self, channel: &str) -> Option<Arc<Segment>> {
        self.core.cache.get(channel)
    }

    pub fn span(&self) -> f64 {
        self.view().spans.current()
    }

    pub fn set_span(&self, seconds: f64) -> Result<()> {
        let seconds = validate_span(seconds)?;
        self.view_mut().spans.set(seconds)?;
        info!("{}: span set to {seconds}s", self.source_name());
        Ok(())
    }

    /// Widen to the next registered span.
    pub fn span_up(&self) -> f64 {
        let span = self.view_mut().spans.next();
        info!("{}: span set to {span}s", self.source_name());
        span
    }

    /// Narrow to the previous registered span.
    pub fn span_down(&self) -> f64 {
        let span = self.view_mut().spans.previous();
        info!("{}: span set to {span}s", self.source_name());
        span
    }

    /// Freeze the window where it is now. Ticks keep running.
    pub fn pause(&self) {
        let now = self.core.clock.now();
        let mut view = self.view_mut();
        if view.pause_anchor.is_none() {
            let anchor = now - view.spans.current();
            view.pause_anchor = Some(anchor);
            info!("{}: paused at {anchor:.3}", self.source_name());
        }
    }

    /// Go back to a window trailing "now".
    pub fn resume(&self) {
        if self.view_mut().pause_anchor.take().is_some() {
            info!("{}: resumed", self.source_name());
        }
    }

    pub fn is_paused(&self) -> bool {
        self.view().pause_anchor.is_some()
    }

    pub fn window(&self) -> TimeWindow {
        self.core.window()
    }

    /// Republish cached data for the current window. No I/O.
    pub fn slide(&self) -> TimeWindow {
        self.core.slide()
    }

    /// Run one fetch-merge-cache cycle unless one is already running.
    pub fn refresh(&self) -> RefreshOutcome {
        self.core.refresh()
    }

    /// True while a refresh cycle is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.core.in_flight.load(Ordering::Acquire)
    }

    pub fn set_refresh_interval_ms(&self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(MonitorError::InvalidInterval);
        }
        self.refresh_interval_ms.store(ms, Ordering::SeqCst);
        if let Some(workers) = self.workers().as_ref() {
            workers.refresh.reschedule(Duration::from_millis(ms));
        }
        info!("{}: refresh interval {ms}ms", self.source_name());
        Ok(())
    }

    pub fn set_slide_interval_ms(&self, ms: u64) -> Result<()> {
        if ms == 0 {
            return Err(MonitorError::InvalidInterval);
        }
        self.slide_interval_ms.store(ms, Ordering::SeqCst);
        if let Some(workers) = self.workers().as_ref() {
            workers.slide.reschedule(Duration::from_millis(ms));
        }
        info!("{}: slide interval {ms}ms", self.source_name());
        Ok(())
    }

    pub fn state(&self) -> SchedulerState {
        if self.workers().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Start both tickers. The first refresh runs immediately.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers();
        if workers.is_some() {
            debug!("{}: already running", self.source_name());
            return Ok(());
        }
        let slide_every = Duration::from_millis(self.slide_interval_ms.load(Ordering::SeqCst));
        let refresh_every = Duration::from_millis(self.refresh_interval_ms.load(Ordering::SeqCst));

        let core = Arc::clone(&self.core);
        let slide = Ticker::spawn("slide", slide_every, slide_every, move || {
            core.slide();
        })?;
        let core = Arc::clone(&self.core);
        let refresh = match Ticker::spawn("refresh", refresh_every, Duration::ZERO, move || {
            core.refresh();
        }) {
            Ok(ticker) => ticker,
            Err(e) => {
                slide.request_stop();
                slide.finish(Instant::now() + self.shutdown_timeout);
                return Err(e.into());
            }
        };
        *workers = Some(Workers { slide, refresh });
        info!(
            "{}: started (slide every {:?}, refresh every {:?})",
            self.source_name(),
            slide_every,
            refresh_every
        );
        Ok(())
    }

    /// Cancel both tickers and wait a bounded time for an in-flight refresh.
    pub fn stop(&self) {
        let Some(workers) = self.workers().take() else {
            return;
        };
        workers.slide.request_stop();
        workers.refresh.request_stop();
        let deadline = Instant::now() + self.shutdown_timeout;
        workers.slide.finish(deadline);
        workers.refresh.finish(deadline);
        info!("{}: stopped", self.source_name());
    }

    pub fn report(&self) -> MonitorReport {
        let mut channels: Vec<ChannelHealth> = self
            .core
            .health
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        channels.sort_by(|a, b| a.channel.cmp(&b.channel));
        for health in &mut channels {
            health.cached_samples = self.core.cache.get(&health.channel).map(|s| s.len());
        }
        MonitorReport {
            source: self.source_name().to_string(),
            state: self.state(),
            paused: self.is_paused(),
            span: self.span(),
            window: self.window(),
            refreshing: self.is_refreshing(),
            cycles_completed: self.core.cycles_completed.load(Ordering::Relaxed),
            cycles_skipped: self.core.cycles_skipped.load(Ordering::Relaxed),
            channels,
        }
    }

    fn view(&self) -> std::sync::RwLockReadGuard<'_, ViewState> {
        self.core.view.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn view_mut(&self) -> std::sync::RwLockWriteGuard<'_, ViewState> {
        self.core.view.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Option<Workers>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
