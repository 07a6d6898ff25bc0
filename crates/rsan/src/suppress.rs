//! Duplicate-report filtering.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use rsan_shadow::StackId;
use rustc_hash::FxHashSet;

use crate::report::RaceReport;

#[derive(Default)]
struct Seen {
    /// Reported stack pairs, smaller id first.
    stacks: FxHashSet<(StackId, StackId)>,
    /// Reported ranges, `start -> end`. Disjoint: an overlapping report is
    /// never admitted.
    ranges: BTreeMap<u64, u64>,
}

/// Remembers what was reported and rejects repeats.
///
/// With `equal_stacks`, a race whose two stacks match an earlier report (in
/// either order) is dropped. With `equal_addresses`, a race whose address
/// range overlaps an earlier report is dropped.
pub struct Suppressor {
    equal_stacks: bool,
    equal_addresses: bool,
    seen: Mutex<Seen>,
}

impl Suppressor {
    #[must_use]
    pub fn new(equal_stacks: bool, equal_addresses: bool) -> Self {
        Self {
            equal_stacks,
            equal_addresses,
            seen: Mutex::new(Seen::default()),
        }
    }

    /// True if `report` should be emitted. Admitted reports are remembered.
    pub fn admit(&self, report: &RaceReport) -> bool {
        let (a, b) = (report.current.stack, report.previous.stack);
        let pair = if a.raw() <= b.raw() { (a, b) } else { (b, a) };
        let (start, end) = report.range();

        let mut seen = self.seen.lock();
        if self.equal_stacks && seen.stacks.contains(&pair) {
            return false;
        }
        if self.equal_addresses {
            // Only the last range starting before `end` can reach `start`.
            let overlaps = seen
                .ranges
                .range(..end)
                .next_back()
                .is_some_and(|(_, &hi)| hi > start);
            if overlaps {
                return false;
            }
            seen.ranges.insert(start, end);
        }
        seen.stacks.insert(pair);
        true
    }
}

#[cfg(test)]
mod tests {
    use rsan_clock::Tid;
    use rsan_shadow::AccessKind;

    use super::*;
    use crate::report::{LocationHint, ReportAccess};

    fn report(cur: u32, prev: u32, addr: u64) -> RaceReport {
        let access = |stack: u32, tid: u32| ReportAccess {
            tid: Tid::new(tid),
            kind: AccessKind::Write,
            addr,
            size: 4,
            stack: StackId::new(stack),
        };
        RaceReport {
            current: access(cur, 1),
            previous: access(prev, 2),
            location: LocationHint::Unknown,
            threads: Vec::new(),
        }
    }

    #[test]
    fn test_equal_stacks_in_either_order() {
        let s = Suppressor::new(true, false);
        assert!(s.admit(&report(1, 2, 0x100)));
        assert!(!s.admit(&report(2, 1, 0x900)));
        assert!(s.admit(&report(1, 3, 0x100)));
    }

    #[test]
    fn test_equal_addresses_by_overlap() {
        let s = Suppressor::new(false, true);
        assert!(s.admit(&report(1, 2, 0x100)));
        assert!(!s.admit(&report(3, 4, 0x102)));
        assert!(s.admit(&report(1, 2, 0x104)));
    }

    #[test]
    fn test_overlap_found_among_many_ranges() {
        let s = Suppressor::new(false, true);
        assert!(s.admit(&report(1, 2, 0x200)));
        assert!(s.admit(&report(1, 2, 0x100)));
        assert!(s.admit(&report(1, 2, 0x300)));
        assert!(!s.admit(&report(3, 4, 0x1fe)));
        assert!(!s.admit(&report(3, 4, 0xfe)));
        assert!(!s.admit(&report(3, 4, 0x302)));
        assert!(s.admit(&report(3, 4, 0x180)));
        assert!(s.admit(&report(3, 4, 0x204)));
    }

    #[test]
    fn test_disabled_admits_everything() {
        let s = Suppressor::new(false, false);
        assert!(s.admit(&report(1, 2, 0x100)));
        assert!(s.admit(&report(1, 2, 0x100)));
    }
}
