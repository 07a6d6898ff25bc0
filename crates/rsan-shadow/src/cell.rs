//! Fixed-capacity ring of recent accesses for one unit.

use crate::entry::{Access, ShadowEntry};
use crate::SHADOW_CELLS;

/// Access history of one aligned unit.
#[derive(Clone, Debug, Default)]
pub struct ShadowCell {
    entries: [Option<ShadowEntry>; SHADOW_CELLS],
    next_seq: u64,
}

impl ShadowCell {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `access` and return the most recent conflicting prior entry.
    pub fn record(&mut self, access: &Access) -> Option<ShadowEntry> {
        self.record_with(access, |_| true)
    }

    /// Record `access` and return the most recent conflicting prior entry for
    /// which `is_race` holds.
    ///
    /// The conflict scan runs before insertion, so the returned entry is never
    /// the access itself. A repeat of an entry already present refreshes it in
    /// place; otherwise the access goes into a free slot or replaces the
    /// oldest entry.
    pub fn record_with<F>(&mut self, access: &Access, mut is_race: F) -> Option<ShadowEntry>
    where
        F: FnMut(&ShadowEntry) -> bool,
    {
        let conflict = self
            .entries
            .iter()
            .flatten()
            .filter(|e| e.conflicts_with(access))
            .filter(|e| is_race(e))
            .max_by_key(|e| e.seq)
            .cloned();

        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(repeat) = self.entries.iter_mut().flatten().find(|e| e.is_repeat_of(access)) {
            repeat.pc = access.pc;
            repeat.stack = access.stack;
            repeat.seq = seq;
            return conflict;
        }

        let victim = self.victim_index();
        self.entries[victim] = Some(ShadowEntry::from_access(access, seq));
        conflict
    }

    /// First empty slot, else the oldest entry.
    fn victim_index(&self) -> usize {
        let mut oldest = 0;
        let mut oldest_seq = u64::MAX;
        for (idx, entry) in self.entries.iter().enumerate() {
            match entry {
                None => return idx,
                Some(e) if e.seq < oldest_seq => {
                    oldest = idx;
                    oldest_seq = e.seq;
                }
                Some(_) => {}
            }
        }
        oldest
    }

    /// Forget entries touching bytes `[offset, offset + size)`.
    pub fn clear_bytes(&mut self, offset: u8, size: u8) {
        for slot in &mut self.entries {
            if slot.as_ref().is_some_and(|e| e.overlaps(offset, size)) {
                *slot = None;
            }
        }
    }

    /// Entries from oldest to newest.
    #[must_use]
    pub fn entries(&self) -> Vec<ShadowEntry> {
        let mut out: Vec<ShadowEntry> = self.entries.iter().flatten().cloned().collect();
        out.sort_by_key(|e| e.seq);
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(Option::is_none)
    }
}
