use log::debug;

use crate::monitor::error::{MonitorError, Result};
use crate::monitor::segment::{Segment, GRID_EPSILON};
use crate::monitor::window::TimeWindow;

/// Result of one merge pass for one channel.
#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    /// New segment to store in the cache.
    Replaced(Segment),
    /// Keep whatever is cached.
    Unchanged,
}

/// Stitches freshly fetched fragments onto the cached segment so the cache
/// covers the visible window without gaps or duplicate samples.
#[derive(Clone, Copy, Debug)]
pub struct SegmentMerger {
    /// How far back from the cached edge each incremental fetch reaches.
    pub fetch_overlap: f64,
    /// Largest hole between cached data and a new fragment that is still bridged.
    pub adjacency_tolerance: f64,
}

impl Default for SegmentMerger {
    fn default() -> Self {
        Self {
            fetch_overlap: 10.0,
            adjacency_tolerance: 10.0,
        }
    }
}

impl SegmentMerger {
    pub fn new(fetch_overlap: f64, adjacency_tolerance: f64) -> Self {
        Self {
            fetch_overlap,
            adjacency_tolerance,
        }
    }

    /// Bring `cached` up to date for `window`.
    ///
    /// `fetch(start, end)` asks the provider for `[start, end)`. A provider
    /// error aborts this channel's pass and leaves the cache untouched.
    pub fn merge<F>(
        &self,
        cached: Option<&Segment>,
        window: &TimeWindow,
        mut fetch: F,
    ) -> Result<MergeOutcome>
    where
        F: FnMut(f64, f64) -> Result<Option<Segment>>,
    {
        let cached = match cached {
            Some(seg) if seg.overlaps_window(window) => seg,
            _ => return self.full_fetch(window, &mut fetch),
        };

        let mut merged = cached.clone();
        let mut grew = false;

        if cached.end_time() < window.end {
            let from = cached.end_time() - self.fetch_overlap;
            if let Some(piece) = fetch(from, window.end)? {
                match self.stitch(&merged, &piece) {
                    Ok(Some(next)) => {
                        merged = next;
                        grew = true;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_incompatible() => {
                        debug!("{}: {e}; refetching whole window", cached.channel());
                        return self.full_fetch(window, &mut fetch);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if missing_head(cached, window) {
            let to = cached.start_time() + self.fetch_overlap;
            if let Some(piece) = fetch(window.start, to)? {
                match self.stitch(&merged, &piece) {
                    Ok(Some(next)) => {
                        merged = next;
                        grew = true;
                    }
                    Ok(None) => {}
                    Err(e) if e.is_incompatible() => {
                        debug!("{}: {e}; refetching whole window", cached.channel());
                        return self.full_fetch(window, &mut fetch);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if !grew && cached.is_within(window) {
            return Ok(MergeOutcome::Unchanged);
        }
        match merged.subset_window(window) {
            Ok(trimmed) if trimmed == *cached => Ok(MergeOutcome::Unchanged),
            Ok(trimmed) => Ok(MergeOutcome::Replaced(trimmed)),
            Err(MonitorError::OutOfRange { .. }) => Ok(MergeOutcome::Unchanged),
            Err(e) => Err(e),
        }
    }

    /// Combine `piece` into `base` if it touches it; `Ok(None)` discards it.
    fn stitch(&self, base: &Segment, piece: &Segment) -> Result<Option<Segment>> {
        if piece.is_empty() {
            return Ok(None);
        }
        if !(piece.overlaps(base) || piece.is_adjacent_to(base, self.adjacency_tolerance)) {
            debug!(
                "{}: discarding disjoint fragment [{:.3}, {:.3})",
                base.channel(),
                piece.start_time(),
                piece.end_time()
            );
            return Ok(None);
        }
        base.combine(piece).map(Some)
    }

    fn full_fetch<F>(&self, window: &TimeWindow, fetch: &mut F) -> Result<MergeOutcome>
    where
        F: FnMut(f64, f64) -> Result<Option<Segment>>,
    {
        let Some(fresh) = fetch(window.start, window.end)? else {
            return Ok(MergeOutcome::Unchanged);
        };
        if fresh.is_empty() {
            // Provider answered but has nothing yet; remember that distinctly from "never fetched".
            return Ok(MergeOutcome::Replaced(fresh));
        }
        match fresh.subset_window(window) {
            Ok(trimmed) => Ok(MergeOutcome::Replaced(trimmed)),
            Err(MonitorError::OutOfRange { .. }) => Ok(MergeOutcome::Unchanged),
            Err(e) => Err(e),
        }
    }
}

/// True when at least one grid sample lies in `[window.start, cached.start)`.
///
/// A window start that falls between two samples leaves the cached start up
/// to one period later; that is not missing data.
fn missing_head(cached: &Segment, window: &TimeWindow) -> bool {
    (cached.start_time() - window.start) * cached.sample_rate() >= 1.0 - GRID_EPSILON
}
