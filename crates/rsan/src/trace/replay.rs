use rsan_clock::Tid;
use rustc_hash::FxHashMap;
use tracing::{debug, info_span};

use super::{Event, Op, Result, Trace, TraceError};
use crate::Context;

/// What a replay did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Events delivered to the context.
    pub events: usize,
    /// Trace line after which the session halted.
    pub halted_at: Option<usize>,
}

/// Trace thread numbers mapped to session thread ids.
struct Threads(FxHashMap<u32, Tid>);

impl Threads {
    fn lookup(&self, event: &Event, thread: u32) -> Result<Tid> {
        self.0
            .get(&thread)
            .copied()
            .ok_or(TraceError::UnknownThread {
                line: event.line,
                thread,
            })
    }
}

/// Feed every event of `trace` into `ctx`, in order, stopping early if the
/// context asks to halt.
///
/// `T0` is the main thread; every other trace thread must be introduced by a
/// `start` event before it is used. Session thread ids are assigned in start
/// order, so a trace that starts `T1, T2, ...` in sequence keeps its numbering.
///
/// # Errors
///
/// Returns an error if an event names a thread that was never started, or
/// starts one twice.
pub fn replay(ctx: &Context, trace: &Trace) -> Result<ReplayStats> {
    let _span = info_span!("replay", events = trace.events.len()).entered();
    let mut threads = Threads(FxHashMap::default());
    threads.0.insert(0, Tid::MAIN);
    let mut stats = ReplayStats::default();

    for event in &trace.events {
        if let Op::Start { parent, pc } = event.op {
            let parent = threads.lookup(event, parent)?;
            if threads.0.contains_key(&event.thread) {
                return Err(TraceError::DuplicateThread {
                    line: event.line,
                    thread: event.thread,
                });
            }
            let tid = ctx.on_thread_start(parent, pc);
            debug!(line = event.line, thread = event.thread, %tid, "thread started");
            threads.0.insert(event.thread, tid);
        } else {
            let tid = threads.lookup(event, event.thread)?;
            dispatch(ctx, &threads, tid, event)?;
        }
        stats.events += 1;

        if ctx.should_halt() {
            debug!(line = event.line, "halting replay");
            stats.halted_at = Some(event.line);
            break;
        }
    }
    Ok(stats)
}

fn dispatch(ctx: &Context, threads: &Threads, tid: Tid, event: &Event) -> Result<()> {
    match event.op {
        Op::Start { .. } => {}
        Op::Read { addr, size, pc } => ctx.on_read(tid, addr, size, pc),
        Op::Write { addr, size, pc } => ctx.on_write(tid, addr, size, pc),
        Op::Lock { addr, pc } => ctx.on_lock(tid, addr, pc),
        Op::Unlock { addr, pc } => ctx.on_unlock(tid, addr, pc),
        Op::ReadLock { addr, pc } => ctx.on_read_lock(tid, addr, pc),
        Op::ReadUnlock { addr, pc } => ctx.on_read_unlock(tid, addr, pc),
        Op::MutexCreate { addr, pc } => ctx.on_mutex_create(tid, addr, pc),
        Op::MutexDestroy { addr, pc } => ctx.on_mutex_destroy(tid, addr, pc),
        Op::Acquire { addr } => ctx.on_acquire(tid, addr),
        Op::Release { addr } => ctx.on_release(tid, addr),
        Op::FuncEntry { pc } => ctx.on_func_entry(tid, pc),
        Op::FuncExit => ctx.on_func_exit(tid),
        Op::Alloc { addr, size, pc } => ctx.on_alloc(tid, addr, size, pc),
        Op::Free { addr } => ctx.on_free(tid, addr),
        Op::Exit => ctx.on_thread_exit(tid),
        Op::Join { child } => ctx.on_thread_join(tid, threads.lookup(event, child)?),
        Op::StackBounds { lo, hi } => ctx.set_stack_bounds(tid, lo, hi),
        Op::Name(ref name) => ctx.set_thread_name(tid, name),
    }
    Ok(())
}
