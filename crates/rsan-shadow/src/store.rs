//! Sharded address → cell map.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::cell::ShadowCell;
use crate::entry::{Access, ShadowEntry};
use crate::UNIT_SIZE;

/// Number of independently locked shards.
const SHARDS: usize = 64;

/// Part of an access that falls inside one unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnitRange {
    /// First byte address of this part.
    pub addr: u64,
    /// Bytes in this part (`1..=UNIT_SIZE`).
    pub size: u8,
}

impl UnitRange {
    /// Aligned address of the unit containing this part.
    #[must_use]
    pub const fn unit_addr(&self) -> u64 {
        self.addr - self.addr % UNIT_SIZE
    }
}

/// Split `[addr, addr + size)` at unit boundaries.
pub fn units(addr: u64, size: u64) -> impl Iterator<Item = UnitRange> {
    let end = addr.saturating_add(size);
    let mut cur = addr;
    std::iter::from_fn(move || {
        if cur >= end {
            return None;
        }
        let unit_end = (cur - cur % UNIT_SIZE).saturating_add(UNIT_SIZE);
        let part_end = unit_end.min(end);
        // part_end - cur <= UNIT_SIZE
        #[allow(clippy::cast_possible_truncation)]
        let part = UnitRange {
            addr: cur,
            size: (part_end - cur) as u8,
        };
        cur = part_end;
        Some(part)
    })
}

/// Shadow memory for the whole monitored address space.
///
/// Cells are created on first access. Each shard is guarded by its own lock,
/// held only for the duration of one cell update.
pub struct ShadowStore {
    shards: Box<[Mutex<FxHashMap<u64, ShadowCell>>]>,
}

impl ShadowStore {
    #[must_use]
    pub fn new() -> Self {
        let shards = (0..SHARDS)
            .map(|_| Mutex::new(FxHashMap::default()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard(&self, unit: u64) -> &Mutex<FxHashMap<u64, ShadowCell>> {
        // Fibonacci hashing; the top bits pick the shard.
        let h = unit.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 58;
        &self.shards[h as usize % SHARDS]
    }

    /// Record `access` in its unit's ring and return the most recent
    /// conflicting prior entry, if any.
    ///
    /// `access` must fit in one unit; split wider accesses with [`units`].
    pub fn record_access(&self, access: &Access) -> Option<ShadowEntry> {
        self.record_access_with(access, |_| true)
    }

    /// Like [`record_access`](Self::record_access), but only conflicts
    /// accepted by `is_race` are returned. The predicate runs under the
    /// shard lock and must not touch the store.
    pub fn record_access_with<F>(&self, access: &Access, is_race: F) -> Option<ShadowEntry>
    where
        F: FnMut(&ShadowEntry) -> bool,
    {
        debug_assert!(access.size > 0);
        debug_assert!(u64::from(access.offset()) + u64::from(access.size) <= UNIT_SIZE);
        let unit = access.addr / UNIT_SIZE;
        let mut shard = self.shard(unit).lock();
        shard.entry(unit).or_default().record_with(access, is_race)
    }

    /// Forget all history for `[addr, addr + size)`.
    pub fn reset_range(&self, addr: u64, size: u64) {
        for part in units(addr, size) {
            let unit = part.addr / UNIT_SIZE;
            let mut shard = self.shard(unit).lock();
            if u64::from(part.size) == UNIT_SIZE {
                shard.remove(&unit);
            } else if let Some(cell) = shard.get_mut(&unit) {
                #[allow(clippy::cast_possible_truncation)]
                let offset = (part.addr % UNIT_SIZE) as u8;
                cell.clear_bytes(offset, part.size);
                if cell.is_empty() {
                    shard.remove(&unit);
                }
            }
        }
    }

    /// Snapshot of the entries covering `addr`'s unit, oldest first.
    #[must_use]
    pub fn entries_at(&self, addr: u64) -> Vec<ShadowEntry> {
        let unit = addr / UNIT_SIZE;
        self.shard(unit)
            .lock()
            .get(&unit)
            .map(ShadowCell::entries)
            .unwrap_or_default()
    }

    /// Entries currently remembered for `addr`'s unit.
    #[must_use]
    pub fn cell_len(&self, addr: u64) -> usize {
        let unit = addr / UNIT_SIZE;
        self.shard(unit).lock().get(&unit).map_or(0, ShadowCell::len)
    }

    /// Number of units with at least one cell allocated.
    #[must_use]
    pub fn tracked_units(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

impl Default for ShadowStore {
    fn default() -> Self {
        Self::new()
    }
}
