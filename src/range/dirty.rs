//! Concurrency-safe set of disjoint dirty ranges.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

use super::RangeInterval;

/// Byte ranges written locally but not yet uploaded.
///
/// Every insert merges the new interval with all intervals it overlaps or
/// touches inside one critical section, so any observer sees a pairwise
/// disjoint, non-adjacent set.
#[derive(Debug, Default)]
pub struct DirtyRangeSet {
    /// Start offset -> exclusive end offset.
    ranges: Mutex<BTreeMap<u64, u64>>,
}

impl DirtyRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an interval, coalescing it with every mergeable neighbour.
    pub fn insert(&self, interval: RangeInterval) {
        let mut ranges = self.ranges.lock();
        let merged = Self::coalesce(&mut ranges, interval);
        debug!(
            "Dirty range {} registered as {} ({} pending)",
            interval,
            merged,
            ranges.len()
        );
    }

    /// Inserts several intervals under a single lock acquisition.
    pub fn insert_all<I>(&self, intervals: I)
    where
        I: IntoIterator<Item = RangeInterval>,
    {
        let mut ranges = self.ranges.lock();
        for interval in intervals {
            Self::coalesce(&mut ranges, interval);
        }
    }

    fn coalesce(ranges: &mut BTreeMap<u64, u64>, interval: RangeInterval) -> RangeInterval {
        let mut merged = interval;
        // Mergeable entries start at or before `merged.end()`. Of those only
        // the last one can reach `merged.offset()`, since entries are disjoint.
        loop {
            let hit = ranges
                .range(..=merged.end())
                .next_back()
                .filter(|&(_, &end)| end >= merged.offset())
                .map(|(&start, &end)| (start, end));

            match hit {
                Some((start, end)) => {
                    ranges.remove(&start);
                    merged = merged.merge(&RangeInterval::span(start, end));
                }
                None => break,
            }
        }
        ranges.insert(merged.offset(), merged.end());
        merged
    }

    /// Atomically removes and returns every pending interval, in offset order.
    pub fn drain_all(&self) -> Vec<RangeInterval> {
        let drained = std::mem::take(&mut *self.ranges.lock());
        drained
            .into_iter()
            .map(|(start, end)| RangeInterval::span(start, end))
            .collect()
    }

    /// Returns the pending intervals without removing them.
    pub fn snapshot(&self) -> Vec<RangeInterval> {
        self.ranges
            .lock()
            .iter()
            .map(|(&start, &end)| RangeInterval::span(start, end))
            .collect()
    }

    pub fn clear(&self) {
        self.ranges.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.ranges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.lock().is_empty()
    }

    /// Total number of dirty bytes.
    pub fn covered_bytes(&self) -> u64 {
        self.ranges
            .lock()
            .iter()
            .map(|(start, end)| end - start)
            .sum()
    }
}
