use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::monitor::segment::Segment;

/// Slot owned by one registered channel. `None` until the first successful fetch.
#[derive(Default)]
struct Slot {
    segment: RwLock<Option<Arc<Segment>>>,
}

/// Latest merged segment per channel.
///
/// The outer map is only locked to find or add a slot; reads and writes of a
/// segment lock that channel's slot alone, so channels never wait on each
/// other. Segments are replaced wholesale, so a reader sees either the old or
/// the new `Arc`.
#[derive(Default)]
pub struct ChannelCache {
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl ChannelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel with no cached data. Returns false if it was already registered.
    pub fn register(&self, channel: &str) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots.contains_key(channel) {
            return false;
        }
        slots.insert(channel.to_string(), Arc::new(Slot::default()));
        true
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(channel)
    }

    /// Registered channel names, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, channel: &str) -> Option<Arc<Segment>> {
        let slot = self.slot(channel)?;
        let segment = slot.segment.read().unwrap_or_else(PoisonError::into_inner);
        segment.clone()
    }

    /// Replace the cached segment. Ignored (returns false) for channels that
    /// are not registered, so a late writer cannot resurrect a removed channel.
    pub fn put(&self, channel: &str, segment: Segment) -> bool {
        let Some(slot) = self.slot(channel) else {
            return false;
        };
        *slot.segment.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(segment));
        true
    }

    /// Drop the channel and its cached segment.
    pub fn remove(&self, channel: &str) -> Option<Arc<Segment>> {
        let slot = self
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(channel)?;
        let segment = slot.segment.write().unwrap_or_else(PoisonError::into_inner).take();
        segment
    }

    fn slot(&self, channel: &str) -> Option<Arc<Slot>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }
}
