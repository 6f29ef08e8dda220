use crate::measurement::Measurement;
use serde_derive::Serialize;
use std::sync::{Arc, Mutex, PoisonError};

/// Number of monitored strings: three inverters with strings A/B/C plus the
/// two strings behind the WebBox gateway.
pub const SOURCE_COUNT: usize = 11;

/// Index of one string in the snapshot. Always below [`SOURCE_COUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(usize);

impl SourceId {
    pub const fn new(index: usize) -> Option<Self> {
        if index < SOURCE_COUNT {
            Some(Self(index))
        } else {
            None
        }
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// Copy of the snapshot handed to readers, with the derived total.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotView {
    pub strings: [Measurement; SOURCE_COUNT],
    pub total: f64,
}

impl SnapshotView {
    pub fn from_strings(strings: [Measurement; SOURCE_COUNT]) -> Self {
        let total = strings.iter().map(|s| s.power).sum();
        Self { strings, total }
    }
}

/// Latest reading for every string, shared between the acquisition loop and
/// the read API. Cloning shares the same underlying values.
#[derive(Clone, Default)]
pub struct SharedSnapshot {
    strings: Arc<Mutex<[Measurement; SOURCE_COUNT]>>,
}

impl SharedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a group of readings under a single lock so readers see either
    /// all of them or none.
    pub fn update(&self, sources: &[SourceId], values: &[Measurement]) {
        debug_assert_eq!(sources.len(), values.len());
        let mut strings = self.strings.lock().unwrap_or_else(PoisonError::into_inner);
        for (source, value) in sources.iter().zip(values) {
            strings[source.index()] = *value;
        }
    }

    /// Copies all readings under one lock and derives the total.
    pub fn read_all(&self) -> SnapshotView {
        let strings = *self.strings.lock().unwrap_or_else(PoisonError::into_inner);
        SnapshotView::from_strings(strings)
    }

    pub fn get(&self, source: SourceId) -> Measurement {
        self.strings.lock().unwrap_or_else(PoisonError::into_inner)[source.index()]
    }
}
