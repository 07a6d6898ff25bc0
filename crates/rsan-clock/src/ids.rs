//! Thread and slot identifiers.

use std::fmt;

/// Logical time of a single clock component.
///
/// The upper half holds the era of the slot (how many times it was handed to
/// a new thread), the lower half the occupant's counter. Epochs of later
/// occupants therefore compare above every epoch of earlier ones.
pub type Epoch = u64;

const ERA_SHIFT: u32 = 32;

/// Era an epoch belongs to.
#[must_use]
pub fn era_of(epoch: Epoch) -> u32 {
    u32::try_from(epoch >> ERA_SHIFT).unwrap_or(u32::MAX)
}

/// First epoch of `era`.
#[must_use]
pub fn era_start(era: u32) -> Epoch {
    (Epoch::from(era) << ERA_SHIFT) | 1
}

/// Unique identifier of a monitored thread for the whole session.
///
/// Thread ids are never reused; `T0` is the main thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(u32);

impl Tid {
    /// The main thread.
    pub const MAIN: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_main(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Index of a thread's component inside a [`VectorClock`](crate::VectorClock).
///
/// A slot belongs to one thread at a time. When the slot table is bounded a
/// retired thread's slot may be handed to a new thread, which counts in the
/// next era of the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u32);

impl Slot {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
