//! The race detector: instrumentation entry points and the happens-before
//! check.

use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use rsan_clock::{Slot, Tid, VectorClock};
use rsan_shadow::{Access, AccessKind, ShadowEntry, ShadowStore, StackId, units};
use tracing::{debug, info};

use crate::config::Config;
use crate::heap::{HeapBlock, HeapRegistry};
use crate::report::{LocationHint, RaceReport, ReportAccess, ReportSink, Reporter, StderrSink};
use crate::stack::StackDepot;
use crate::sync::{SyncObject, SyncRegistry};
use crate::thread::{ThreadInfo, ThreadRegistry, ThreadState};

/// What the accessing thread looked like at the access.
struct Accessor {
    tid: Tid,
    slot: Slot,
    clock: Arc<VectorClock>,
    stack: StackId,
}

/// Totals returned by [`Context::finish`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub races_reported: u64,
    pub reports_suppressed: u64,
    pub threads: usize,
    pub sync_objects: usize,
    pub shadow_units: usize,
}

/// A detection session.
///
/// All entry points take `&self` and may be called from any thread. Events
/// naming an unknown or finished thread are ignored.
pub struct Context {
    config: Config,
    shadow: ShadowStore,
    threads: ThreadRegistry,
    syncs: SyncRegistry,
    stacks: StackDepot,
    heap: HeapRegistry,
    reporter: Reporter,
}

impl Context {
    /// Session reporting to stderr.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_sink(config, Box::new(StderrSink))
    }

    #[must_use]
    pub fn with_sink(config: Config, sink: Box<dyn ReportSink>) -> Self {
        let reporter = Reporter::new(&config, sink);
        debug!(
            symbolizer = reporter.symbolizer().resolver_name(),
            max_threads = config.max_threads,
            "session started"
        );
        Self {
            shadow: ShadowStore::new(),
            threads: ThreadRegistry::new(config.max_threads),
            syncs: SyncRegistry::new(),
            stacks: StackDepot::new(),
            heap: HeapRegistry::new(),
            reporter,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub const fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    #[must_use]
    pub const fn shadow(&self) -> &ShadowStore {
        &self.shadow
    }

    // ------------------------------------------------------------------
    // Memory accesses
    // ------------------------------------------------------------------

    pub fn on_read(&self, tid: Tid, addr: u64, size: u64, pc: u64) {
        self.access(tid, addr, size, pc, AccessKind::Read);
    }

    pub fn on_write(&self, tid: Tid, addr: u64, size: u64, pc: u64) {
        self.access(tid, addr, size, pc, AccessKind::Write);
    }

    fn access(&self, tid: Tid, addr: u64, size: u64, pc: u64, kind: AccessKind) {
        if size == 0 {
            return;
        }
        let Some(accessor) = self.accessor(tid, pc) else {
            return;
        };
        counter!("rsan_accesses_total").increment(1);

        let mut race: Option<(ShadowEntry, u64)> = None;
        for part in units(addr, size) {
            let access = Access {
                addr: part.addr,
                size: part.size,
                kind,
                tid,
                slot: accessor.slot,
                clock: Arc::clone(&accessor.clock),
                pc,
                stack: accessor.stack,
            };
            let prior = self
                .shadow
                .record_access_with(&access, |entry| !Self::is_ordered(entry, &accessor));
            if race.is_none() {
                race = prior.map(|entry| (entry, part.unit_addr()));
            }
        }

        if let Some((prior, unit_addr)) = race {
            let current = ReportAccess {
                tid,
                kind,
                addr,
                size,
                stack: accessor.stack,
            };
            let previous = ReportAccess {
                tid: prior.tid,
                kind: prior.kind,
                addr: prior.addr_in(unit_addr),
                size: u64::from(prior.size),
                stack: prior.stack,
            };
            self.report_race(current, previous);
        }
    }

    /// Whether the remembered `entry` happens-before the access described by
    /// `accessor`: the accessor has seen the entry's own epoch, in the era of
    /// the slot the entry was made in.
    fn is_ordered(entry: &ShadowEntry, accessor: &Accessor) -> bool {
        accessor
            .clock
            .knows(entry.slot, entry.clock.get(entry.slot))
    }

    fn accessor(&self, tid: Tid, pc: u64) -> Option<Accessor> {
        let state = self.threads.get(tid)?;
        let state = state.lock();
        if !state.is_running() {
            debug!(%tid, "access by finished thread ignored");
            return None;
        }
        let stack = self.stacks.intern(&state.capture(pc, self.config.history));
        Some(Accessor {
            tid,
            slot: state.slot,
            clock: Arc::clone(state.clock()),
            stack,
        })
    }

    fn report_race(&self, current: ReportAccess, previous: ReportAccess) {
        let location = if let Some(block) = self.heap.find(current.addr) {
            LocationHint::Heap(block)
        } else if let Some(owner) = self.threads.stack_owner(current.addr) {
            LocationHint::Stack(owner)
        } else {
            LocationHint::Unknown
        };

        let mut involved = vec![current.tid, previous.tid];
        if let LocationHint::Heap(block) = location {
            involved.push(block.tid);
        }
        let mut threads: Vec<ThreadInfo> = Vec::new();
        for tid in involved {
            if tid.is_main() || threads.iter().any(|t| t.tid == tid) {
                continue;
            }
            threads.extend(self.threads.info(tid));
        }

        let report = RaceReport {
            current,
            previous,
            location,
            threads,
        };
        self.reporter.submit(&report, &self.stacks);
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn running(&self, tid: Tid) -> Option<Arc<Mutex<ThreadState>>> {
        let state = self.threads.get(tid)?;
        if state.lock().is_running() {
            Some(state)
        } else {
            debug!(%tid, "sync event from finished thread ignored");
            None
        }
    }

    fn stack_of(&self, tid: Tid, pc: u64) -> StackId {
        self.threads.get(tid).map_or(StackId::EMPTY, |state| {
            self.stacks.intern(&state.lock().capture(pc, self.config.history))
        })
    }

    /// Run `f` with the sync object at `addr` and the thread locked, in that
    /// order.
    fn with_sync<F>(&self, tid: Tid, addr: u64, f: F)
    where
        F: FnOnce(&mut SyncObject, &mut ThreadState),
    {
        let Some(thread) = self.running(tid) else {
            return;
        };
        let sync = self.syncs.get_or_create(addr, StackId::EMPTY);
        let mut sync = sync.lock();
        let mut thread = thread.lock();
        f(&mut sync, &mut thread);
    }

    /// Acquire everything released on `addr` (exclusive and shared).
    pub fn on_acquire(&self, tid: Tid, addr: u64) {
        self.with_sync(tid, addr, |sync, thread| {
            thread.acquire(sync.clock());
            thread.acquire(sync.read_clock());
            thread.tick();
        });
    }

    /// Publish the thread's clock on `addr`.
    pub fn on_release(&self, tid: Tid, addr: u64) {
        self.with_sync(tid, addr, |sync, thread| {
            sync.release(thread.clock());
            thread.tick();
        });
    }

    /// Mutex initialization: a 1-byte write of the mutex memory, then a
    /// fresh sync identity.
    pub fn on_mutex_create(&self, tid: Tid, addr: u64, pc: u64) {
        self.access(tid, addr, 1, pc, AccessKind::Write);
        if self.running(tid).is_some() {
            self.syncs.create(addr, self.stack_of(tid, pc));
        }
    }

    /// Mutex destruction: a 1-byte write, then the identity is dropped.
    pub fn on_mutex_destroy(&self, tid: Tid, addr: u64, pc: u64) {
        if self.running(tid).is_none() {
            return;
        }
        self.access(tid, addr, 1, pc, AccessKind::Write);
        if self.syncs.destroy(addr).is_none() {
            debug!(%tid, addr = format_args!("{addr:#x}"), "destroy of unknown mutex");
        }
    }

    pub fn on_lock(&self, tid: Tid, addr: u64, pc: u64) {
        self.access(tid, addr, 1, pc, AccessKind::Read);
        self.with_sync(tid, addr, |sync, thread| {
            if sync.lock(tid) {
                thread.acquire(sync.clock());
                thread.acquire(sync.read_clock());
                thread.tick();
            }
        });
    }

    pub fn on_unlock(&self, tid: Tid, addr: u64, pc: u64) {
        self.access(tid, addr, 1, pc, AccessKind::Read);
        self.with_sync(tid, addr, |sync, thread| {
            if sync.unlock(tid) {
                sync.release(thread.clock());
                thread.tick();
            }
        });
    }

    /// Shared (reader) lock: observes exclusive releases only.
    pub fn on_read_lock(&self, tid: Tid, addr: u64, pc: u64) {
        self.access(tid, addr, 1, pc, AccessKind::Read);
        self.with_sync(tid, addr, |sync, thread| {
            sync.lock_shared();
            thread.acquire(sync.clock());
            thread.tick();
        });
    }

    /// Shared unlock: publishes into the reader clock, which the next
    /// exclusive lock observes.
    pub fn on_read_unlock(&self, tid: Tid, addr: u64, pc: u64) {
        self.access(tid, addr, 1, pc, AccessKind::Read);
        self.with_sync(tid, addr, |sync, thread| {
            sync.unlock_shared();
            sync.release_shared(thread.clock());
            thread.tick();
        });
    }

    // ------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------

    /// Register a thread created by `parent` at `pc`.
    pub fn on_thread_start(&self, parent: Tid, pc: u64) -> Tid {
        let stack = self.stack_of(parent, pc);
        self.threads.create(parent, stack)
    }

    pub fn on_thread_join(&self, parent: Tid, child: Tid) {
        if self.running(parent).is_some() {
            self.threads.join(parent, child);
        }
    }

    pub fn on_thread_exit(&self, tid: Tid) {
        self.threads.exit(tid);
    }

    pub fn on_func_entry(&self, tid: Tid, pc: u64) {
        if let Some(state) = self.threads.get(tid) {
            state.lock().push_frame(pc);
        }
    }

    pub fn on_func_exit(&self, tid: Tid) {
        if let Some(state) = self.threads.get(tid) {
            state.lock().pop_frame();
        }
    }

    pub fn set_thread_name(&self, tid: Tid, name: &str) {
        if let Some(state) = self.threads.get(tid) {
            state.lock().name = Some(name.to_string());
        }
    }

    /// Stack memory of `tid` is `[lo, hi)`.
    pub fn set_stack_bounds(&self, tid: Tid, lo: u64, hi: u64) {
        if let Some(state) = self.threads.get(tid) {
            state.lock().set_stack_bounds(lo, hi);
        }
    }

    // ------------------------------------------------------------------
    // Heap
    // ------------------------------------------------------------------

    /// Fresh heap block: any history left from earlier use of the range is
    /// dropped.
    pub fn on_alloc(&self, tid: Tid, addr: u64, size: u64, pc: u64) {
        self.shadow.reset_range(addr, size);
        self.heap.alloc(HeapBlock {
            addr,
            size,
            tid,
            stack: self.stack_of(tid, pc),
        });
    }

    pub fn on_free(&self, tid: Tid, addr: u64) {
        match self.heap.free(addr) {
            Some(block) => self.shadow.reset_range(block.addr, block.size),
            None => debug!(%tid, addr = format_args!("{addr:#x}"), "free of unknown block"),
        }
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    /// Whether reports will carry symbol information.
    #[must_use]
    pub fn symbolizer_available(&self) -> bool {
        self.reporter.symbolizer().is_available()
    }

    /// Reports emitted so far.
    #[must_use]
    pub fn races_reported(&self) -> u64 {
        self.reporter.races_reported()
    }

    /// Races dropped as duplicates.
    #[must_use]
    pub fn reports_suppressed(&self) -> u64 {
        self.reporter.reports_suppressed()
    }

    /// True once a report was emitted with `halt_on_error` set.
    #[must_use]
    pub fn should_halt(&self) -> bool {
        self.reporter.is_halted()
    }

    /// End the session and return its totals.
    pub fn finish(self) -> SessionSummary {
        self.reporter.flush();
        let summary = SessionSummary {
            races_reported: self.reporter.races_reported(),
            reports_suppressed: self.reporter.reports_suppressed(),
            threads: self.threads.len(),
            sync_objects: self.syncs.len(),
            shadow_units: self.shadow.tracked_units(),
        };
        #[allow(clippy::cast_precision_loss)]
        let units = summary.shadow_units as f64;
        gauge!("rsan_shadow_units").set(units);
        info!(
            races = summary.races_reported,
            suppressed = summary.reports_suppressed,
            threads = summary.threads,
            "session finished"
        );
        summary
    }
}
