//! Batch ranges and the batch planner.

use serde::{Deserialize, Serialize};

/// Closed, inclusive numeric interval: either primary-key values or unix
/// epoch seconds, depending on how the range was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchRange {
    pub start: i64,
    pub end: i64,
}

impl BatchRange {
    /// Sentinel meaning "no rows matched"; a package with this range is skipped.
    pub const EMPTY: BatchRange = BatchRange { start: 0, end: 0 };

    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Build a range from nullable MIN/MAX aggregates.
    pub fn from_bounds(min: Option<i64>, max: Option<i64>) -> Self {
        match (min, max) {
            (Some(start), Some(end)) if start <= end => Self { start, end },
            _ => Self::EMPTY,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    pub fn contains(&self, value: i64) -> bool {
        self.start <= value && value <= self.end
    }

    /// Number of keys covered by the interval.
    pub fn width(&self) -> u64 {
        if self.end < self.start {
            return 0;
        }
        (self.end as i128 - self.start as i128 + 1).min(u64::MAX as i128) as u64
    }
}

impl std::fmt::Display for BatchRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Slice `[start, end]` into contiguous closed sub-ranges of `width` keys.
///
/// Every sub-range has exactly `width` keys except the last, which is clipped
/// to `end`. The output depends only on the arguments: resume offsets address
/// batches by their position in this list.
pub fn plan_batches(start: i64, end: i64, width: u64) -> Vec<BatchRange> {
    if start > end {
        return Vec::new();
    }

    let step = width.max(1).min(i64::MAX as u64) as i64;
    let count = (BatchRange::new(start, end).width()).div_ceil(step as u64);
    let mut batches = Vec::with_capacity(count as usize);

    let mut lo = start;
    loop {
        let hi = lo.saturating_add(step - 1).min(end);
        batches.push(BatchRange::new(lo, hi));
        if hi >= end {
            break;
        }
        lo = hi + 1;
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_id_range() {
        let plan = plan_batches(1, 2500, 1000);
        assert_eq!(
            plan,
            vec![
                BatchRange::new(1, 1000),
                BatchRange::new(1001, 2000),
                BatchRange::new(2001, 2500),
            ]
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        assert_eq!(plan_batches(17, 98_765, 333), plan_batches(17, 98_765, 333));
    }

    #[test]
    fn test_plan_has_no_gaps_or_overlap() {
        for (start, end, width) in [(1, 2500, 1000), (0, 9, 3), (-50, 50, 7), (5, 5, 100), (1, 2001, 1000)] {
            let plan = plan_batches(start, end, width);
            assert_eq!(plan.first().unwrap().start, start);
            assert_eq!(plan.last().unwrap().end, end);
            for pair in plan.windows(2) {
                assert_eq!(pair[0].end + 1, pair[1].start);
            }
            for batch in &plan[..plan.len() - 1] {
                assert_eq!(batch.width(), width);
            }
            let covered: u64 = plan.iter().map(BatchRange::width).sum();
            assert_eq!(covered, BatchRange::new(start, end).width());
        }
    }

    #[test]
    fn test_plan_keeps_last_key_on_exact_multiple() {
        let plan = plan_batches(1, 2001, 1000);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[2], BatchRange::new(2001, 2001));
    }

    #[test]
    fn test_plan_edge_cases() {
        assert!(plan_batches(10, 1, 100).is_empty());
        assert_eq!(plan_batches(3, 5, 0).len(), 3);
        assert_eq!(
            plan_batches(i64::MAX - 1, i64::MAX, 10),
            vec![BatchRange::new(i64::MAX - 1, i64::MAX)]
        );
    }

    #[test]
    fn test_range_from_bounds() {
        assert_eq!(BatchRange::from_bounds(Some(3), Some(9)), BatchRange::new(3, 9));
        assert!(BatchRange::from_bounds(None, None).is_empty());
        assert!(BatchRange::from_bounds(Some(9), Some(3)).is_empty());
        assert!(BatchRange::new(3, 9).contains(9));
        assert!(!BatchRange::new(3, 9).contains(10));
    }
}
