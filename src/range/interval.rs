//! Contiguous byte span value type.

use std::fmt;

use crate::error::{StreamError, StreamResult};

/// A contiguous, non-empty byte span `[offset, offset + count)`.
///
/// Intervals order by offset first, so sorted collections iterate in
/// buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RangeInterval {
    offset: u64,
    count: u64,
}

impl RangeInterval {
    /// Creates an interval, rejecting empty spans and spans that overflow `u64`.
    pub fn new(offset: u64, count: u64) -> StreamResult<Self> {
        if count == 0 {
            return Err(StreamError::invalid_argument(
                "A range must cover at least one byte",
            ));
        }
        if offset.checked_add(count).is_none() {
            return Err(StreamError::invalid_argument(format!(
                "Range at offset {} with count {} overflows",
                offset, count
            )));
        }
        Ok(Self { offset, count })
    }

    /// Creates an interval from exclusive bounds `[start, end)`.
    pub fn from_bounds(start: u64, end: u64) -> StreamResult<Self> {
        if end <= start {
            return Err(StreamError::invalid_argument(format!(
                "Range end {} must be greater than start {}",
                end, start
            )));
        }
        Self::new(start, end - start)
    }

    /// Rebuilds an interval from bounds the caller already validated.
    pub(crate) fn span(start: u64, end: u64) -> Self {
        debug_assert!(end > start);
        Self {
            offset: start,
            count: end - start,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.count
    }

    /// Returns true if the two intervals overlap or share an endpoint.
    pub fn is_mergeable(&self, other: &RangeInterval) -> bool {
        self.offset <= other.end() && self.end() >= other.offset
    }

    /// Returns the smallest interval covering both.
    ///
    /// Only meaningful for mergeable intervals; for disjoint ones the result
    /// also covers the gap between them.
    pub fn merge(&self, other: &RangeInterval) -> RangeInterval {
        let offset = self.offset.min(other.offset);
        let end = self.end().max(other.end());
        RangeInterval {
            offset,
            count: end - offset,
        }
    }

    /// Returns true if `pos` falls inside the interval.
    pub fn contains(&self, pos: u64) -> bool {
        pos >= self.offset && pos < self.end()
    }

    /// Splits the interval into consecutive pieces no longer than `max_len`.
    pub fn split(&self, max_len: u64) -> Vec<RangeInterval> {
        if max_len == 0 || self.count <= max_len {
            return vec![*self];
        }
        let mut pieces = Vec::with_capacity(self.count.div_ceil(max_len) as usize);
        let mut start = self.offset;
        while start < self.end() {
            let count = max_len.min(self.end() - start);
            pieces.push(RangeInterval {
                offset: start,
                count,
            });
            start += count;
        }
        pieces
    }
}

impl fmt::Display for RangeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.offset, self.end())
    }
}
