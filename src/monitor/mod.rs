pub mod cache;
pub mod config;
pub mod error;
pub mod merger;
pub mod plot;
pub mod scheduler;
pub mod segment;
pub mod sink;
pub mod source;
pub mod window;
// Public re-exports for a compact external API
pub use cache::ChannelCache;
pub use config::MonitorConfig;
pub use error::{MonitorError, Result};
pub use merger::{MergeOutcome, SegmentMerger};
pub use plot::{render_segment_png, PlotStyle, SnapshotSink};
pub use scheduler::{
    ChannelHealth, CycleSummary, MonitorReport, RefreshOutcome, RefreshScheduler, SchedulerState,
};
pub use segment::Segment;
pub use sink::{channel_sink, FanoutSink, FrameSender, LogSink, RenderFrame, RenderSink};
pub use source::{DataSource, FetchCall, ManualSource, SourceRegistry, SyntheticSource};
pub use window::{Clock, ManualClock, SpanRegistry, SystemClock, TimeWindow, DEFAULT_SPANS};
