//! Access descriptions stored in shadow cells.

use std::fmt;
use std::sync::Arc;

use rsan_clock::{Slot, Tid, VectorClock};

use crate::UNIT_SIZE;

/// Kind of memory access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::Write)
    }

    /// Lower-case name (`read` / `write`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// Capitalized name (`Read` / `Write`).
    #[must_use]
    pub const fn title(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Write",
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to an interned call stack.
///
/// The shadow store treats it as opaque; the detector's stack depot gives it
/// meaning. `StackId::EMPTY` stands for "no stack captured".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct StackId(u32);

impl StackId {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// An access about to be recorded. Must not cross a unit boundary.
#[derive(Clone, Debug)]
pub struct Access {
    pub addr: u64,
    pub size: u8,
    pub kind: AccessKind,
    pub tid: Tid,
    pub slot: Slot,
    pub clock: Arc<VectorClock>,
    pub pc: u64,
    pub stack: StackId,
}

impl Access {
    /// Byte offset inside the access's unit.
    #[must_use]
    pub const fn offset(&self) -> u8 {
        // The mask keeps the value below UNIT_SIZE.
        #[allow(clippy::cast_possible_truncation)]
        let off = (self.addr % UNIT_SIZE) as u8;
        off
    }
}

/// One remembered access.
#[derive(Clone, Debug)]
pub struct ShadowEntry {
    pub tid: Tid,
    pub slot: Slot,
    pub clock: Arc<VectorClock>,
    pub kind: AccessKind,
    /// Byte offset inside the unit.
    pub offset: u8,
    pub size: u8,
    pub pc: u64,
    pub stack: StackId,
    /// Insertion order inside the owning cell; larger is more recent.
    pub(crate) seq: u64,
}

impl ShadowEntry {
    pub(crate) fn from_access(access: &Access, seq: u64) -> Self {
        Self {
            tid: access.tid,
            slot: access.slot,
            clock: Arc::clone(&access.clock),
            kind: access.kind,
            offset: access.offset(),
            size: access.size,
            pc: access.pc,
            stack: access.stack,
            seq,
        }
    }

    /// Whether the byte ranges `[offset, offset + size)` intersect.
    #[must_use]
    pub const fn overlaps(&self, offset: u8, size: u8) -> bool {
        self.offset < offset + size && offset < self.offset + self.size
    }

    /// Different thread, overlapping bytes, at least one write.
    #[must_use]
    pub fn conflicts_with(&self, access: &Access) -> bool {
        self.tid != access.tid
            && (self.kind.is_write() || access.kind.is_write())
            && self.overlaps(access.offset(), access.size)
    }

    /// Same thread repeating the same access with the same clock.
    #[must_use]
    pub fn is_repeat_of(&self, access: &Access) -> bool {
        self.tid == access.tid
            && self.kind == access.kind
            && self.offset == access.offset()
            && self.size == access.size
            && (Arc::ptr_eq(&self.clock, &access.clock) || *self.clock == *access.clock)
    }

    /// Byte address of the access given the address of its unit.
    #[must_use]
    pub const fn addr_in(&self, unit_addr: u64) -> u64 {
        unit_addr + self.offset as u64
    }
}
