//! Consumers of published segments.
//!
//! The monitor hands every registered channel's visible data to a
//! [`RenderSink`] on each slide tick. Sinks own all drawing concerns; the
//! segment they receive is a shared read-only snapshot, often the very one
//! held by the cache.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use crate::monitor::segment::Segment;
use crate::monitor::window::TimeWindow;

pub trait RenderSink: Send + Sync {
    fn publish(&self, channel: &str, segment: &Arc<Segment>, window: &TimeWindow);
}

/// Snapshot of one channel as published on a slide tick.
#[derive(Clone, Debug)]
pub struct RenderFrame {
    pub channel: String,
    pub segment: Arc<Segment>,
    pub window: TimeWindow,
}

/// Sink that forwards every frame over an mpsc channel, typically to a UI thread.
#[derive(Clone)]
pub struct FrameSender {
    tx: Arc<Mutex<Sender<RenderFrame>>>,
}

impl RenderSink for FrameSender {
    fn publish(&self, channel: &str, segment: &Arc<Segment>, window: &TimeWindow) {
        let frame = RenderFrame {
            channel: channel.to_string(),
            segment: Arc::clone(segment),
            window: *window,
        };
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        // A dropped receiver just means nobody is watching any more.
        let _ = tx.send(frame);
    }
}

/// Create a new channel pair: `(FrameSender, Receiver<RenderFrame>)`.
pub fn channel_sink() -> (FrameSender, Receiver<RenderFrame>) {
    let (tx, rx) = std::sync::mpsc::channel();
    (
        FrameSender {
            tx: Arc::new(Mutex::new(tx)),
        },
        rx,
    )
}

/// Logs a one-line summary per published frame at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl RenderSink for LogSink {
    fn publish(&self, channel: &str, segment: &Arc<Segment>, window: &TimeWindow) {
        debug!(
            "{channel}: {} samples [{:.2}, {:.2}) in window [{:.2}, {:.2})",
            segment.len(),
            segment.start_time(),
            segment.end_time(),
            window.start,
            window.end
        );
    }
}

/// Fans every frame out to several sinks in order.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn RenderSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn RenderSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn RenderSink>) {
        self.sinks.push(sink);
    }
}

impl RenderSink for FanoutSink {
    fn publish(&self, channel: &str, segment: &Arc<Segment>, window: &TimeWindow) {
        for sink in &self.sinks {
            sink.publish(channel, segment, window);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_delivers_frames() {
        let (sink, rx) = channel_sink();
        let seg = Arc::new(Segment::new("A", 10.0, 1.0, vec![1.0, 2.0, 3.0]).unwrap());
        let window = TimeWindow { start: 10.0, end: 13.0 };
        sink.publish("A", &seg, &window);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.channel, "A");
        assert!(Arc::ptr_eq(&frame.segment, &seg));
        assert_eq!(frame.window, window);
    }

    #[test]
    fn publishing_after_receiver_drop_is_harmless() {
        let (sink, rx) = channel_sink();
        drop(rx);
        let seg = Arc::new(Segment::new("A", 0.0, 1.0, vec![1.0]).unwrap());
        sink.publish("A", &seg, &TimeWindow { start: 0.0, end: 1.0 });
    }

    #[test]
    fn fanout_reaches_every_sink() {
        let (a, rx_a) = channel_sink();
        let (b, rx_b) = channel_sink();
        let mut fanout = FanoutSink::new(vec![Arc::new(a)]);
        fanout.push(Arc::new(b));
        fanout.push(Arc::new(LogSink));
        let seg = Arc::new(Segment::new("A", 0.0, 1.0, vec![1.0]).unwrap());
        fanout.publish("A", &seg, &TimeWindow { start: 0.0, end: 1.0 });
        assert!(Arc::ptr_eq(&rx_a.try_recv().unwrap().segment, &seg));
        assert!(Arc::ptr_eq(&rx_b.try_recv().unwrap().segment, &seg));
    }
}
