//! Thread registry: per-thread clocks, lifecycle and the slot table.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use rsan_clock::{Epoch, Slot, Tid, VectorClock, era_start};
use rsan_shadow::StackId;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Lifecycle of a monitored thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    /// Exited, final clock kept until joined.
    Finished,
    Joined,
}

impl ThreadStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Finished | Self::Joined => "finished",
        }
    }
}

/// Mutable state of one thread. Guarded by its own lock.
#[derive(Debug)]
pub struct ThreadState {
    pub tid: Tid,
    pub slot: Slot,
    pub status: ThreadStatus,
    pub parent: Option<Tid>,
    pub name: Option<String>,
    /// Stack of the creating thread at the create call.
    pub creation_stack: StackId,
    clock: Arc<VectorClock>,
    stack_bounds: Option<(u64, u64)>,
    /// Return addresses pushed by function entry, outermost first.
    call_stack: Vec<u64>,
}

impl ThreadState {
    fn new(tid: Tid, slot: Slot, clock: VectorClock) -> Self {
        Self {
            tid,
            slot,
            status: ThreadStatus::Running,
            parent: None,
            name: None,
            creation_stack: StackId::EMPTY,
            clock: Arc::new(clock),
            stack_bounds: None,
            call_stack: Vec::new(),
        }
    }

    /// Current clock. Cloning the `Arc` is the snapshot taken per access.
    #[must_use]
    pub const fn clock(&self) -> &Arc<VectorClock> {
        &self.clock
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, ThreadStatus::Running)
    }

    /// Advance the thread's own component. Snapshots already handed out keep
    /// the old value.
    pub fn tick(&mut self) -> Epoch {
        Arc::make_mut(&mut self.clock).tick(self.slot)
    }

    /// Merge `other` into the thread's clock.
    pub fn acquire(&mut self, other: &VectorClock) {
        if !other.happens_before(&self.clock) {
            Arc::make_mut(&mut self.clock).join(other);
        }
    }

    pub fn push_frame(&mut self, pc: u64) {
        self.call_stack.push(pc);
    }

    /// Pop the innermost frame. Unbalanced exits are ignored.
    pub fn pop_frame(&mut self) -> Option<u64> {
        self.call_stack.pop()
    }

    #[must_use]
    pub fn call_stack(&self) -> &[u64] {
        &self.call_stack
    }

    /// `pc` followed by the call stack, innermost first, at most `depth` long.
    #[must_use]
    pub fn capture(&self, pc: u64, depth: usize) -> Vec<u64> {
        std::iter::once(pc)
            .chain(self.call_stack.iter().rev().copied())
            .take(depth.max(1))
            .collect()
    }

    pub const fn set_stack_bounds(&mut self, lo: u64, hi: u64) {
        self.stack_bounds = Some((lo, hi));
    }

    #[must_use]
    pub fn owns_stack_address(&self, addr: u64) -> bool {
        self.stack_bounds
            .is_some_and(|(lo, hi)| addr >= lo && addr < hi)
    }
}

#[derive(Debug)]
struct SlotInfo {
    occupant: Tid,
    era: u32,
    /// Retirement order of the current occupant, `None` while it runs.
    retired: Option<u64>,
}

/// Assignment of clock slots to threads.
///
/// Up to `max` slots are handed out fresh. After that a new thread reuses the
/// slot retired longest ago and counts in the slot's next era, so clocks keep
/// what they knew of the earlier occupant apart from the new one.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<SlotInfo>,
    max: usize,
    retire_seq: u64,
}

impl SlotTable {
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            slots: Vec::new(),
            max: max.max(1),
            retire_seq: 0,
        }
    }

    /// Slot and initial counter for `tid`.
    pub fn allocate(&mut self, tid: Tid) -> (Slot, Epoch) {
        if self.slots.len() >= self.max {
            let oldest = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(idx, info)| info.retired.map(|seq| (seq, idx)))
                .min();
            if let Some((_, idx)) = oldest {
                let info = &mut self.slots[idx];
                info.occupant = tid;
                info.era += 1;
                info.retired = None;
                let slot = slot_at(idx);
                debug!(%tid, %slot, era = info.era, "recycled slot");
                return (slot, era_start(info.era));
            }
            warn!(
                max = self.max,
                live = self.slots.len(),
                "all slots are live, growing slot table"
            );
        }
        self.slots.push(SlotInfo {
            occupant: tid,
            era: 0,
            retired: None,
        });
        (slot_at(self.slots.len() - 1), era_start(0))
    }

    /// Mark `slot` reusable.
    pub fn retire(&mut self, slot: Slot) {
        if let Some(info) = self.slots.get_mut(slot.index()) {
            info.retired = Some(self.retire_seq);
            self.retire_seq += 1;
        }
    }

    /// Thread currently assigned to `slot`.
    #[must_use]
    pub fn occupant(&self, slot: Slot) -> Option<Tid> {
        self.slots.get(slot.index()).map(|info| info.occupant)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn slot_at(idx: usize) -> Slot {
    Slot::new(u32::try_from(idx).unwrap_or(u32::MAX))
}

/// Snapshot of a thread for report rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: Tid,
    pub status: ThreadStatus,
    pub parent: Option<Tid>,
    pub name: Option<String>,
    pub creation_stack: StackId,
}

/// All threads seen in the session. `T0` exists from the start.
pub struct ThreadRegistry {
    threads: RwLock<FxHashMap<Tid, Arc<Mutex<ThreadState>>>>,
    slots: RwLock<SlotTable>,
    next_tid: AtomicU32,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new(max_threads: usize) -> Self {
        let mut slots = SlotTable::new(max_threads);
        let (slot, start) = slots.allocate(Tid::MAIN);
        let mut clock = VectorClock::new();
        clock.set(slot, start);

        let mut threads = FxHashMap::default();
        threads.insert(
            Tid::MAIN,
            Arc::new(Mutex::new(ThreadState::new(Tid::MAIN, slot, clock))),
        );
        Self {
            threads: RwLock::new(threads),
            slots: RwLock::new(slots),
            next_tid: AtomicU32::new(1),
        }
    }

    #[must_use]
    pub fn get(&self, tid: Tid) -> Option<Arc<Mutex<ThreadState>>> {
        self.threads.read().get(&tid).cloned()
    }

    /// Register a thread created by `parent`.
    ///
    /// The child starts from the parent's clock as of the create call, then
    /// the parent ticks so nothing it does afterwards is visible to the child.
    /// An unknown parent yields a child with no inherited knowledge.
    pub fn create(&self, parent: Tid, creation_stack: StackId) -> Tid {
        let tid = Tid::new(self.next_tid.fetch_add(1, Ordering::Relaxed));
        let (slot, start) = self.slots.write().allocate(tid);

        let mut clock = match self.get(parent) {
            Some(state) => {
                let mut state = state.lock();
                let snapshot = VectorClock::clone(state.clock());
                state.tick();
                snapshot
            }
            None => {
                warn!(%parent, %tid, "thread created by unknown parent");
                VectorClock::new()
            }
        };
        // On a recycled slot this keeps the parent's knowledge of earlier
        // occupants as prior knowledge.
        clock.set(slot, start);

        let mut state = ThreadState::new(tid, slot, clock);
        state.parent = Some(parent);
        state.creation_stack = creation_stack;
        self.threads.write().insert(tid, Arc::new(Mutex::new(state)));

        counter!("rsan_threads_created_total").increment(1);
        debug!(%tid, %parent, %slot, "thread created");
        tid
    }

    /// Mark `tid` finished and release its slot. Returns false if the thread
    /// is unknown or already finished.
    pub fn exit(&self, tid: Tid) -> bool {
        let Some(state) = self.get(tid) else {
            debug!(%tid, "exit of unknown thread");
            return false;
        };
        let slot = {
            let mut state = state.lock();
            if !state.is_running() {
                return false;
            }
            state.status = ThreadStatus::Finished;
            state.slot
        };
        self.slots.write().retire(slot);
        debug!(%tid, %slot, "thread finished");
        true
    }

    /// Merge `child`'s final clock into `parent`. A join of a thread that was
    /// never seen exiting implies its exit.
    pub fn join(&self, parent: Tid, child: Tid) -> bool {
        let (Some(parent_state), Some(child_state)) = (self.get(parent), self.get(child)) else {
            debug!(%parent, %child, "join with unknown thread");
            return false;
        };
        self.exit(child);
        let final_clock = {
            let mut child_state = child_state.lock();
            child_state.status = ThreadStatus::Joined;
            Arc::clone(child_state.clock())
        };
        let mut parent_state = parent_state.lock();
        parent_state.acquire(&final_clock);
        parent_state.tick();
        true
    }

    #[must_use]
    pub fn info(&self, tid: Tid) -> Option<ThreadInfo> {
        let state = self.get(tid)?;
        let state = state.lock();
        Some(ThreadInfo {
            tid: state.tid,
            status: state.status,
            parent: state.parent,
            name: state.name.clone(),
            creation_stack: state.creation_stack,
        })
    }

    /// Thread whose registered stack contains `addr`.
    #[must_use]
    pub fn stack_owner(&self, addr: u64) -> Option<Tid> {
        self.threads
            .read()
            .values()
            .find_map(|state| {
                let state = state.lock();
                state.owns_stack_address(addr).then_some(state.tid)
            })
    }

    /// Threads ever created, including `T0`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }

    /// Slots handed out so far.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.read().len()
    }
}

#[cfg(test)]
mod tests {
    use rsan_clock::ClockOrder;

    use super::*;

    fn clock_of(reg: &ThreadRegistry, tid: Tid) -> Arc<VectorClock> {
        Arc::clone(reg.get(tid).unwrap().lock().clock())
    }

    #[test]
    fn test_main_thread_exists() {
        let reg = ThreadRegistry::new(16);
        let main = reg.info(Tid::MAIN).unwrap();
        assert_eq!(main.status, ThreadStatus::Running);
        assert_eq!(main.parent, None);
        assert_eq!(clock_of(&reg, Tid::MAIN).get(Slot::new(0)), 1);
    }

    #[test]
    fn test_child_inherits_then_parent_ticks() {
        let reg = ThreadRegistry::new(16);
        let before = clock_of(&reg, Tid::MAIN);
        let child = reg.create(Tid::MAIN, StackId::EMPTY);
        assert_eq!(child, Tid::new(1));

        let child_clock = clock_of(&reg, child);
        let parent_clock = clock_of(&reg, Tid::MAIN);
        assert_eq!(before.compare(&child_clock), ClockOrder::Less);
        assert_eq!(parent_clock.compare(&child_clock), ClockOrder::Concurrent);
    }

    #[test]
    fn test_join_orders_child_before_parent() {
        let reg = ThreadRegistry::new(16);
        let child = reg.create(Tid::MAIN, StackId::EMPTY);
        reg.get(child).unwrap().lock().tick();
        let child_clock = clock_of(&reg, child);

        assert!(reg.join(Tid::MAIN, child));
        assert_eq!(reg.info(child).unwrap().status, ThreadStatus::Joined);
        assert!(child_clock.happens_before(&clock_of(&reg, Tid::MAIN)));
    }

    #[test]
    fn test_exit_twice() {
        let reg = ThreadRegistry::new(16);
        let child = reg.create(Tid::MAIN, StackId::EMPTY);
        assert!(reg.exit(child));
        assert!(!reg.exit(child));
        assert!(!reg.exit(Tid::new(99)));
    }

    #[test]
    fn test_recycled_slot_starts_next_era() {
        let mut table = SlotTable::new(2);
        let (s0, _) = table.allocate(Tid::MAIN);
        let (s1, e1) = table.allocate(Tid::new(1));
        assert_eq!(e1, era_start(0));
        table.retire(s1);

        let (s2, e2) = table.allocate(Tid::new(2));
        assert_eq!(s2, s1);
        assert_eq!(e2, era_start(1));
        assert_eq!(table.occupant(s2), Some(Tid::new(2)));
        assert_eq!(table.occupant(s0), Some(Tid::MAIN));

        table.retire(s2);
        assert_eq!(table.allocate(Tid::new(3)), (s1, era_start(2)));
    }

    #[test]
    fn test_oldest_retired_slot_is_reused() {
        let mut table = SlotTable::new(3);
        table.allocate(Tid::MAIN);
        let (a, _) = table.allocate(Tid::new(1));
        let (b, _) = table.allocate(Tid::new(2));
        table.retire(b);
        table.retire(a);
        assert_eq!(table.allocate(Tid::new(3)).0, b);
        assert_eq!(table.allocate(Tid::new(4)).0, a);
    }

    #[test]
    fn test_table_grows_when_all_live() {
        let mut table = SlotTable::new(1);
        table.allocate(Tid::MAIN);
        let (slot, start) = table.allocate(Tid::new(1));
        assert_eq!(slot, Slot::new(1));
        assert_eq!(start, 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_recycled_child_keeps_parent_knowledge() {
        let reg = ThreadRegistry::new(2);
        let t1 = reg.create(Tid::MAIN, StackId::EMPTY);
        let slot = reg.get(t1).unwrap().lock().slot;
        let last = reg.get(t1).unwrap().lock().tick();
        reg.join(Tid::MAIN, t1);

        let t2 = reg.create(Tid::MAIN, StackId::EMPTY);
        let state = reg.get(t2).unwrap();
        let state = state.lock();
        assert_eq!(state.slot, slot);
        assert_eq!(state.clock().get(slot), era_start(1));
        assert!(state.clock().knows(slot, last));
    }

    #[test]
    fn test_join_after_reuse_keeps_both_occupants() {
        let reg = ThreadRegistry::new(2);
        let t1 = reg.create(Tid::MAIN, StackId::EMPTY);
        let slot = reg.get(t1).unwrap().lock().slot;
        let t1_last = reg.get(t1).unwrap().lock().tick();
        reg.exit(t1);

        let t2 = reg.create(Tid::MAIN, StackId::EMPTY);
        let t2_last = reg.get(t2).unwrap().lock().tick();
        assert!(reg.join(Tid::MAIN, t2));
        assert!(reg.join(Tid::MAIN, t1));

        let main = clock_of(&reg, Tid::MAIN);
        assert!(main.knows(slot, t1_last));
        assert!(main.knows(slot, t2_last));
    }

    #[test]
    fn test_capture_and_stack_bounds() {
        let reg = ThreadRegistry::new(4);
        let state = reg.get(Tid::MAIN).unwrap();
        {
            let mut state = state.lock();
            state.push_frame(0x10);
            state.push_frame(0x20);
            assert_eq!(state.capture(0x30, 8), vec![0x30, 0x20, 0x10]);
            assert_eq!(state.capture(0x30, 2), vec![0x30, 0x20]);
            assert_eq!(state.capture(0x30, 0), vec![0x30]);
            assert_eq!(state.pop_frame(), Some(0x20));
            state.set_stack_bounds(0x7000, 0x8000);
        }
        assert_eq!(reg.stack_owner(0x7ff0), Some(Tid::MAIN));
        assert_eq!(reg.stack_owner(0x8000), None);
    }
}
