//! An eventually-consistent striped counter for tracking the map's size.
//!
//! A single `AtomicI64` would serialize every insert and remove on one cache
//! line; instead the count is split over a handful of cache-padded cells and
//! each thread hashes to its own cell.  The sum may be transiently negative
//! while mutations are in flight (a remove's decrement can land before the
//! matching insert's increment is visible), so reads clamp at zero.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_utils::CachePadded;

/// Hands out a distinct stripe probe to every thread that touches a counter.
static NEXT_PROBE: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static PROBE: usize = NEXT_PROBE.fetch_add(1, Ordering::Relaxed);
}

/// A striped add-only counter.
///
/// `add` never contends across threads that hash to different stripes;
/// `sum` folds all stripes and is only accurate once mutators quiesce.
#[derive(Debug)]
pub(crate) struct StripedCounter {
    cells: Box<[CachePadded<AtomicI64>]>,
}

impl StripedCounter {
    pub(crate) fn new() -> Self {
        let stripes = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .next_power_of_two()
            .clamp(4, 64);
        StripedCounter {
            cells: (0..stripes)
                .map(|_| CachePadded::new(AtomicI64::new(0)))
                .collect(),
        }
    }

    pub(crate) fn add(&self, delta: i64) {
        let slot = PROBE.with(|p| *p) & (self.cells.len() - 1);
        self.cells[slot].fetch_add(delta, Ordering::Relaxed);
    }

    /// The folded count, clamped at zero.
    pub(crate) fn sum(&self) -> usize {
        let total: i64 = self.cells.iter().map(|c| c.load(Ordering::Relaxed)).sum();
        usize::try_from(total).unwrap_or(0)
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        StripedCounter::new()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::StripedCounter;

    #[test]
    fn add_and_sum() {
        let counter = StripedCounter::new();
        counter.add(5);
        counter.add(-2);
        assert_eq!(counter.sum(), 3);
    }

    #[test]
    fn negative_sums_clamp_to_zero() {
        let counter = StripedCounter::new();
        counter.add(-7);
        assert_eq!(counter.sum(), 0);
    }

    #[test]
    fn concurrent_adds_converge() {
        let counter = StripedCounter::new();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..10_000 {
                        counter.add(1);
                    }
                    for _ in 0..2_500 {
                        counter.add(-1);
                    }
                });
            }
        });
        assert_eq!(counter.sum(), 8 * 7_500);
    }
}
