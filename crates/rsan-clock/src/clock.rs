//! Vector clock with component-wise partial order.

use std::cmp::Ordering;
use std::fmt;

use crate::{Epoch, Slot, era_of};

/// Result of comparing two vector clocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockOrder {
    /// Every component is equal.
    Equal,
    /// Every component of the left clock is `<=` the right one, at least one `<`.
    Less,
    /// Every component of the left clock is `>=` the right one, at least one `>`.
    Greater,
    /// Some components are smaller and some are larger.
    Concurrent,
}

impl ClockOrder {
    /// True when the two clocks are causally related (or identical).
    #[must_use]
    pub const fn is_ordered(self) -> bool {
        !matches!(self, Self::Concurrent)
    }

    /// The order seen from the other side.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Less => Self::Greater,
            Self::Greater => Self::Less,
            other => other,
        }
    }
}

/// Vector of per-slot counters.
///
/// Components past the end of the vector are implicitly zero, so clocks of
/// different lengths compare and merge as if padded.
///
/// A recycled slot has several eras (see [`Epoch`]). The vector holds the
/// latest era known for each slot; what was known of earlier eras is kept in
/// `prior`, one entry per `(slot, era)`, so learning about a new occupant never
/// erases knowledge of the previous one.
#[derive(Clone, Default)]
pub struct VectorClock {
    counters: Vec<Epoch>,
    /// Sorted by slot, then era.
    prior: Vec<(Slot, Epoch)>,
}

impl VectorClock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: Vec::new(),
            prior: Vec::new(),
        }
    }

    /// Counter of `slot` in the latest era this clock knows.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Epoch {
        self.counters.get(slot.index()).copied().unwrap_or(0)
    }

    /// Overwrite the counter of `slot`, growing the clock if needed.
    ///
    /// A value from another era does not overwrite: the older of the two is
    /// kept as prior knowledge.
    pub fn set(&mut self, slot: Slot, value: Epoch) {
        let idx = slot.index();
        if idx >= self.counters.len() {
            self.counters.resize(idx + 1, 0);
        }
        let current = self.counters[idx];
        if current == 0 || value == 0 || era_of(current) == era_of(value) {
            self.counters[idx] = value;
        } else {
            self.absorb(slot, value);
        }
    }

    /// Advance `slot` by one and return the new value.
    pub fn tick(&mut self, slot: Slot) -> Epoch {
        let next = self.get(slot) + 1;
        self.set(slot, next);
        next
    }

    /// Maximum of the current counter of `slot` and `value`, era-aware.
    fn absorb(&mut self, slot: Slot, value: Epoch) {
        if value == 0 {
            return;
        }
        let idx = slot.index();
        if idx >= self.counters.len() {
            self.counters.resize(idx + 1, 0);
        }
        let current = self.counters[idx];
        if current == 0 || era_of(current) == era_of(value) {
            self.counters[idx] = current.max(value);
        } else if value > current {
            self.counters[idx] = value;
            self.remember(slot, current);
        } else {
            self.remember(slot, value);
        }
    }

    /// Record `value` as knowledge of an era other than the current one.
    fn remember(&mut self, slot: Slot, value: Epoch) {
        let era = era_of(value);
        match self
            .prior
            .binary_search_by_key(&(slot, era), |&(s, e)| (s, era_of(e)))
        {
            Ok(pos) => self.prior[pos].1 = self.prior[pos].1.max(value),
            Err(pos) => self.prior.insert(pos, (slot, value)),
        }
    }

    fn prior_of(&self, slot: Slot, era: u32) -> Epoch {
        self.prior
            .binary_search_by_key(&(slot, era), |&(s, e)| (s, era_of(e)))
            .map_or(0, |pos| self.prior[pos].1)
    }

    /// Whether this clock has seen `epoch` of `slot`. Knowledge only counts
    /// within the era `epoch` belongs to.
    #[must_use]
    pub fn knows(&self, slot: Slot, epoch: Epoch) -> bool {
        if epoch == 0 {
            return true;
        }
        let era = era_of(epoch);
        let current = self.get(slot);
        (era_of(current) == era && current >= epoch) || self.prior_of(slot, era) >= epoch
    }

    /// In-place pairwise maximum with `other`, era by era.
    pub fn join(&mut self, other: &Self) {
        for (idx, &theirs) in other.counters.iter().enumerate() {
            self.absorb(slot_at(idx), theirs);
        }
        for &(slot, value) in &other.prior {
            if era_of(self.get(slot)) == era_of(value) {
                self.absorb(slot, value);
            } else {
                self.remember(slot, value);
            }
        }
    }

    /// Pairwise maximum of two clocks.
    #[must_use]
    pub fn merge(a: &Self, b: &Self) -> Self {
        let mut out = a.clone();
        out.join(b);
        out
    }

    /// Compare under the partial order of knowledge: `a <= b` when `b` knows
    /// every epoch `a` knows.
    #[must_use]
    pub fn compare(&self, other: &Self) -> ClockOrder {
        match (self.happens_before(other), other.happens_before(self)) {
            (true, true) => ClockOrder::Equal,
            (true, false) => ClockOrder::Less,
            (false, true) => ClockOrder::Greater,
            (false, false) => ClockOrder::Concurrent,
        }
    }

    /// `self <= other`.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        self.counters
            .iter()
            .enumerate()
            .all(|(idx, &c)| other.knows(slot_at(idx), c))
            && self.prior.iter().all(|&(slot, e)| other.knows(slot, e))
    }

    /// Number of slots physically stored (including zero components).
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prior.is_empty() && self.counters.iter().all(|&c| c == 0)
    }

    /// Non-zero components of the latest known eras, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, Epoch)> + '_ {
        self.counters
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c != 0)
            .map(|(idx, &c)| (slot_at(idx), c))
    }
}

fn slot_at(idx: usize) -> Slot {
    Slot::new(u32::try_from(idx).unwrap_or(u32::MAX))
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == ClockOrder::Equal
    }
}

impl Eq for VectorClock {}

impl PartialOrd for VectorClock {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare(other) {
            ClockOrder::Equal => Some(Ordering::Equal),
            ClockOrder::Less => Some(Ordering::Less),
            ClockOrder::Greater => Some(Ordering::Greater),
            ClockOrder::Concurrent => None,
        }
    }
}

impl fmt::Debug for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VectorClock{self}")?;
        if !self.prior.is_empty() {
            f.write_str(" prior[")?;
            for (i, (slot, epoch)) in self.prior.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}:{epoch:#x}", slot.index())?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, (slot, epoch)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}:{epoch}", slot.index())?;
        }
        f.write_str("]")
    }
}

impl FromIterator<(Slot, Epoch)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (Slot, Epoch)>>(iter: I) -> Self {
        let mut clock = Self::new();
        for (slot, epoch) in iter {
            clock.set(slot, epoch);
        }
        clock
    }
}
