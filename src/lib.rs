//! Live multi-channel waveform monitor core.
//!
//! For a set of channels the monitor keeps a sliding time window, periodically
//! asks a [`DataSource`] for the newest samples, stitches them onto a
//! per-channel cache without gaps or duplicates, and republishes the visible
//! part of every channel to a [`RenderSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use seismon::{LogSink, MonitorConfig, RefreshScheduler, SyntheticSource, SystemClock};
//!
//! let source = SyntheticSource::new("synthetic", 100.0, Arc::new(SystemClock)).unwrap();
//! let monitor =
//!     RefreshScheduler::new(Arc::new(source), Arc::new(LogSink), MonitorConfig::default()).unwrap();
//! monitor.register_channel("AV.OKCF.--.EHZ");
//! monitor.start().unwrap();
//! ```

pub mod monitor;

pub use monitor::*;
