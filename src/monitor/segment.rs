use crate::monitor::error::{MonitorError, Result};
use crate::monitor::window::TimeWindow;

/// Fraction of a sample period tolerated as float noise when mapping times onto the sample grid.
pub(crate) const GRID_EPSILON: f64 = 1e-6;

/// Contiguous, immutable block of samples for one channel.
///
/// Sample `i` sits at `start_time + i / sample_rate`; the segment covers the
/// half-open interval `[start_time, end_time)`. A segment with no samples is a
/// valid "empty" answer from a provider.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    channel: String,
    start_time: f64,
    sample_rate: f64,
    samples: Vec<f64>,
}

impl Segment {
    pub fn new(
        channel: impl Into<String>,
        start_time: f64,
        sample_rate: f64,
        samples: Vec<f64>,
    ) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(MonitorError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            channel: channel.into(),
            start_time,
            sample_rate,
            samples,
        })
    }

    pub fn empty(channel: impl Into<String>, start_time: f64, sample_rate: f64) -> Result<Self> {
        Self::new(channel, start_time, sample_rate, Vec::new())
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.samples.len() as f64 / self.sample_rate
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    pub fn time_of(&self, index: usize) -> f64 {
        self.start_time + index as f64 / self.sample_rate
    }

    /// True when both half-open intervals share at least one instant.
    pub fn overlaps(&self, other: &Segment) -> bool {
        !other.is_empty() && self.overlaps_range(other.start_time, other.end_time())
    }

    pub fn overlaps_range(&self, start: f64, end: f64) -> bool {
        !self.is_empty() && self.start_time < end && start < self.end_time()
    }

    pub fn overlaps_window(&self, window: &TimeWindow) -> bool {
        self.overlaps_range(window.start, window.end)
    }

    /// Distance between the two intervals; negative when they overlap.
    pub fn gap_to(&self, other: &Segment) -> f64 {
        self.start_time.max(other.start_time) - self.end_time().min(other.end_time())
    }

    /// True when the segments do not overlap but the hole between them is at
    /// most `tolerance` seconds. Touching intervals are adjacent.
    pub fn is_adjacent_to(&self, other: &Segment, tolerance: f64) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let gap = self.gap_to(other);
        gap >= -GRID_EPSILON / self.sample_rate && gap <= tolerance
    }

    pub fn is_within(&self, window: &TimeWindow) -> bool {
        let slack = GRID_EPSILON / self.sample_rate;
        self.start_time >= window.start - slack && self.end_time() <= window.end + slack
    }

    /// Stitch `newer` onto this segment, covering the union of both intervals.
    ///
    /// `newer` is placed on this segment's sample grid. Where both cover the
    /// same instant the samples of `newer` win. A hole between adjacent
    /// segments is filled with `NaN` so later samples keep their timing.
    pub fn combine(&self, newer: &Segment) -> Result<Segment> {
        if self.channel != newer.channel {
            return Err(MonitorError::ChannelMismatch {
                expected: self.channel.clone(),
                actual: newer.channel.clone(),
            });
        }
        if !same_rate(self.sample_rate, newer.sample_rate) {
            return Err(MonitorError::IncompatibleSegments {
                expected: self.sample_rate,
                actual: newer.sample_rate,
            });
        }
        if newer.is_empty() {
            return Ok(self.clone());
        }
        if self.is_empty() {
            return Ok(newer.clone());
        }

        let rate = self.sample_rate;
        let newer_offset = ((newer.start_time - self.start_time) * rate).round() as i64;
        let base = newer_offset.min(0);
        let self_at = (-base) as usize;
        let newer_at = (newer_offset - base) as usize;
        let len = (self_at + self.len()).max(newer_at + newer.len());

        let mut samples = vec![f64::NAN; len];
        samples[self_at..self_at + self.len()].copy_from_slice(&self.samples);
        samples[newer_at..newer_at + newer.len()].copy_from_slice(&newer.samples);

        Ok(Segment {
            channel: self.channel.clone(),
            start_time: self.start_time + base as f64 / rate,
            sample_rate: rate,
            samples,
        })
    }

    /// Samples whose timestamps fall in `[start, end)`.
    pub fn subset(&self, start: f64, end: f64) -> Result<Segment> {
        let first = self.index_at_or_after(start);
        let last = self.index_at_or_after(end);
        if first >= last {
            return Err(MonitorError::OutOfRange { start, end });
        }
        Ok(Segment {
            channel: self.channel.clone(),
            start_time: self.time_of(first),
            sample_rate: self.sample_rate,
            samples: self.samples[first..last].to_vec(),
        })
    }

    pub fn subset_window(&self, window: &TimeWindow) -> Result<Segment> {
        self.subset(window.start, window.end)
    }

    fn index_at_or_after(&self, t: f64) -> usize {
        let pos = ((t - self.start_time) * self.sample_rate - GRID_EPSILON).ceil();
        if pos > 0.0 {
            (pos as usize).min(self.samples.len())
        } else {
            0
        }
    }
}

fn same_rate(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CH: &str = "AV.OKCF.--.EHZ";

    fn ramp(start: f64, rate: f64, seconds: f64) -> Segment {
        let n = (seconds * rate).round() as usize;
        let samples = (0..n).map(|i| start * rate + i as f64).collect();
        Segment::new(CH, start, rate, samples).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn rejects_bad_sample_rate() {
        assert!(matches!(
            Segment::new(CH, 0.0, 0.0, vec![1.0]),
            Err(MonitorError::InvalidSampleRate(_))
        ));
        assert!(Segment::new(CH, 0.0, f64::INFINITY, vec![]).is_err());
    }

    #[test]
    fn end_time_tracks_sample_count() {
        let seg = ramp(100.0, 60.0, 60.0);
        assert_eq!(seg.len(), 3600);
        assert!(approx(seg.end_time(), 160.0));
        assert!(approx(seg.duration(), 60.0));
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let a = ramp(0.0, 10.0, 10.0);
        let b = ramp(10.0, 10.0, 10.0);
        let c = ramp(9.0, 10.0, 10.0);
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
        assert!(a.is_adjacent_to(&b, 0.0));
        assert!(!a.is_adjacent_to(&c, 10.0));
    }

    #[test]
    fn empty_segment_overlaps_nothing() {
        let empty = Segment::empty(CH, 5.0, 10.0).unwrap();
        let a = ramp(0.0, 10.0, 10.0);
        assert!(!empty.overlaps(&a));
        assert!(!a.overlaps(&empty));
        assert!(!a.is_adjacent_to(&empty, 100.0));
    }

    #[test]
    fn adjacency_respects_tolerance() {
        let a = ramp(0.0, 10.0, 10.0);
        let b = ramp(15.0, 10.0, 5.0);
        assert!(a.is_adjacent_to(&b, 10.0));
        assert!(b.is_adjacent_to(&a, 10.0));
        assert!(!a.is_adjacent_to(&b, 4.0));
    }

    #[test]
    fn combining_adjacent_fragments_keeps_every_sample() {
        let a = ramp(0.0, 50.0, 4.0);
        let b = ramp(4.0, 50.0, 3.0);
        let merged = a.combine(&b).unwrap();
        assert_eq!(merged.len(), a.len() + b.len());
        assert!(approx(merged.start_time(), 0.0));
        assert!(approx(merged.end_time(), 7.0));
        assert!(merged.samples().iter().all(|v| !v.is_nan()));

        let reversed = b.combine(&a).unwrap();
        assert_eq!(reversed, merged);
    }

    #[test]
    fn combining_overlapping_fragments_deduplicates() {
        let a = ramp(100.0, 60.0, 60.0);
        let b = ramp(158.0, 60.0, 14.0);
        let merged = a.combine(&b).unwrap();
        assert!(approx(merged.duration(), 72.0));
        assert_eq!(merged.len(), 72 * 60);
        // The ramp encodes absolute sample index, so a gap-free merge is a strict ramp.
        for pair in merged.samples().windows(2) {
            assert_eq!(pair[1] - pair[0], 1.0);
        }
    }

    #[test]
    fn newer_samples_win_on_overlap() {
        let older = Segment::new(CH, 0.0, 1.0, vec![1.0; 10]).unwrap();
        let newer = Segment::new(CH, 5.0, 1.0, vec![2.0; 10]).unwrap();
        let merged = older.combine(&newer).unwrap();
        assert_eq!(merged.len(), 15);
        assert_eq!(&merged.samples()[..5], &[1.0; 5]);
        assert_eq!(&merged.samples()[5..], &[2.0; 10]);
    }

    #[test]
    fn gap_between_adjacent_fragments_is_filled_with_nan() {
        let a = Segment::new(CH, 0.0, 1.0, vec![1.0; 5]).unwrap();
        let b = Segment::new(CH, 8.0, 1.0, vec![2.0; 2]).unwrap();
        let merged = a.combine(&b).unwrap();
        assert_eq!(merged.len(), 10);
        assert!(merged.samples()[5..8].iter().all(|v| v.is_nan()));
        assert!(approx(merged.end_time(), 10.0));
    }

    #[test]
    fn combine_rejects_rate_and_channel_mismatch() {
        let a = ramp(0.0, 50.0, 1.0);
        let b = ramp(1.0, 100.0, 1.0);
        let err = a.combine(&b).unwrap_err();
        assert!(matches!(err, MonitorError::IncompatibleSegments { .. }));
        assert!(err.is_incompatible());

        let other = Segment::new("AV.SPCP.--.EHZ", 1.0, 50.0, vec![0.0; 50]).unwrap();
        assert!(matches!(
            a.combine(&other),
            Err(MonitorError::ChannelMismatch { .. })
        ));
    }

    #[test]
    fn combine_with_empty_returns_other_side() {
        let a = ramp(0.0, 10.0, 2.0);
        let empty = Segment::empty(CH, 50.0, 10.0).unwrap();
        assert_eq!(a.combine(&empty).unwrap(), a);
        assert_eq!(empty.combine(&a).unwrap(), a);
    }

    #[test]
    fn subset_keeps_half_open_range() {
        let seg = ramp(100.0, 60.0, 60.0);
        let sub = seg.subset(110.0, 120.0).unwrap();
        assert_eq!(sub.len(), 600);
        assert!(approx(sub.start_time(), 110.0));
        assert!(approx(sub.end_time(), 120.0));
        assert_eq!(sub.samples()[0], 110.0 * 60.0);
    }

    #[test]
    fn subset_clamps_to_segment_bounds() {
        let seg = ramp(100.0, 60.0, 60.0);
        let sub = seg.subset(50.0, 500.0).unwrap();
        assert_eq!(sub, seg);
    }

    #[test]
    fn subset_outside_segment_is_out_of_range() {
        let seg = ramp(0.0, 10.0, 60.0);
        assert!(matches!(
            seg.subset(500.0, 560.0),
            Err(MonitorError::OutOfRange { .. })
        ));
        assert!(seg.subset(60.0, 70.0).is_err());
        let empty = Segment::empty(CH, 0.0, 10.0).unwrap();
        assert!(empty.subset(0.0, 10.0).is_err());
    }

    #[test]
    fn subset_of_combined_stays_inside_window() {
        let a = ramp(100.0, 60.0, 60.0);
        let b = ramp(158.0, 60.0, 14.0);
        let window = TimeWindow { start: 110.0, end: 170.0 };
        let sub = a.combine(&b).unwrap().subset_window(&window).unwrap();
        assert!(sub.is_within(&window));
        assert_eq!(sub.len(), 3600);
    }
}
