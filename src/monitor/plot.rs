use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::monitor::error::{MonitorError, Result};
use crate::monitor::segment::Segment;
use crate::monitor::sink::{RenderFrame, RenderSink};
use crate::monitor::window::TimeWindow;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 900,
            height: 240,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW, WHITE],
        }
    }
}

/// Draw one channel's published segment across its window and encode it as PNG.
///
/// The x axis is seconds since the window start. `NaN` samples (bridged gaps)
/// break the trace instead of being drawn.
pub fn render_segment_png(
    segment: &Segment,
    window: &TimeWindow,
    color: RGBColor,
    style: &PlotStyle,
) -> Result<Vec<u8>> {
    let runs = contiguous_runs(segment, window);
    if runs.is_empty() {
        return Err(MonitorError::Plot(format!(
            "{} has no finite samples to draw",
            segment.channel()
        )));
    }
    let (y_min, y_max) = runs
        .iter()
        .flatten()
        .fold((f64::MAX, f64::MIN), |(lo, hi), &(_, v)| (lo.min(v), hi.max(v)));
    let y_bounds = if (y_max - y_min).abs() < f64::EPSILON {
        (y_min - 1.0, y_max + 1.0)
    } else {
        let pad = (y_max - y_min) * 0.05;
        (y_min - pad, y_max + pad)
    };

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let mut chart = ChartBuilder::on(&root)
            .margin(10)
            .build_cartesian_2d(0f64..window.span(), y_bounds.0..y_bounds.1)?;
        for run in runs {
            chart.draw_series(LineSeries::new(run, &color))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}

fn contiguous_runs(segment: &Segment, window: &TimeWindow) -> Vec<Vec<(f64, f64)>> {
    let mut runs = Vec::new();
    let mut current = Vec::new();
    for (i, &value) in segment.samples().iter().enumerate() {
        if value.is_finite() {
            current.push((segment.time_of(i) - window.start, value));
        } else if !current.is_empty() {
            runs.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| MonitorError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}

/// Sink that remembers the latest frame per channel and renders PNG
/// snapshots of them on demand.
#[derive(Clone, Default)]
pub struct SnapshotSink {
    latest: Arc<Mutex<HashMap<String, RenderFrame>>>,
    style: PlotStyle,
}

impl SnapshotSink {
    pub fn new(style: PlotStyle) -> Self {
        Self {
            latest: Arc::new(Mutex::new(HashMap::new())),
            style,
        }
    }

    pub fn latest(&self, channel: &str) -> Option<RenderFrame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }

    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn render(&self, channel: &str) -> Result<Vec<u8>> {
        let frame = self
            .latest(channel)
            .ok_or_else(|| MonitorError::Plot(format!("nothing published for {channel}")))?;
        let color = self.color_for(channel);
        render_segment_png(&frame.segment, &frame.window, color, &self.style)
    }

    /// Write `<channel>.png` for every channel seen so far into `dir`.
    pub fn write_all(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for channel in self.channels() {
            let png = self.render(&channel)?;
            let path = dir.join(format!("{}.png", file_stem(&channel)));
            fs::write(&path, png)?;
            written.push(path);
        }
        Ok(written)
    }

    fn color_for(&self, channel: &str) -> RGBColor {
        if self.style.palette.is_empty() {
            return WHITE;
        }
        let idx = self
            .channels()
            .iter()
            .position(|c| c == channel)
            .unwrap_or(0);
        self.style.palette[idx % self.style.palette.len()]
    }
}

impl RenderSink for SnapshotSink {
    fn publish(&self, channel: &str, segment: &Arc<Segment>, window: &TimeWindow) {
        let frame = RenderFrame {
            channel: channel.to_string(),
            segment: Arc::clone(segment),
            window: *window,
        };
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string(), frame);
    }
}

fn file_stem(channel: &str) -> String {
    channel
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn wave(start: f64, n: usize) -> Segment {
        let samples = (0..n).map(|i| (i as f64 * 0.1).sin() * 100.0).collect();
        Segment::new("AV.OKCF.--.EHZ", start, 10.0, samples).unwrap()
    }

    #[test]
    fn renders_png_for_segment() {
        let seg = wave(100.0, 300);
        let window = TimeWindow { start: 100.0, end: 130.0 };
        let png = render_segment_png(&seg, &window, BLUE, &PlotStyle::default()).unwrap();
        assert_eq!(&png[..8], &PNG_MAGIC);
    }

    #[test]
    fn nan_gaps_split_the_trace() {
        let mut samples = vec![1.0; 4];
        samples.extend([f64::NAN; 3]);
        samples.extend([2.0; 2]);
        let seg = Segment::new("A", 0.0, 1.0, samples).unwrap();
        let runs = contiguous_runs(&seg, &TimeWindow { start: 0.0, end: 9.0 });
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].len(), 4);
        assert_eq!(runs[1][0], (7.0, 2.0));
    }

    #[test]
    fn all_nan_segment_is_not_drawable() {
        let seg = Segment::new("A", 0.0, 1.0, vec![f64::NAN; 4]).unwrap();
        let window = TimeWindow { start: 0.0, end: 4.0 };
        assert!(matches!(
            render_segment_png(&seg, &window, RED, &PlotStyle::default()),
            Err(MonitorError::Plot(_))
        ));
    }

    #[test]
    fn snapshot_sink_keeps_latest_frame() {
        let sink = SnapshotSink::new(PlotStyle::default());
        let window = TimeWindow { start: 0.0, end: 10.0 };
        sink.publish("A", &Arc::new(wave(0.0, 50)), &window);
        sink.publish("A", &Arc::new(wave(0.0, 80)), &window);
        assert_eq!(sink.latest("A").unwrap().segment.len(), 80);
        assert!(sink.render("A").is_ok());
        assert!(sink.render("B").is_err());
    }

    #[test]
    fn file_stem_replaces_unsafe_characters() {
        assert_eq!(file_stem("AV.OKCF.--.EHZ"), "AV.OKCF.--.EHZ");
        assert_eq!(file_stem("a/b c"), "a_b_c");
    }
}
