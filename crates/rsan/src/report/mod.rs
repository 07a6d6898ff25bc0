//! Race reports: assembly, de-duplication, symbolization and emission.

mod render;
mod sink;

pub use render::render;
pub use sink::{BufferSink, ReportSink, StderrSink};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::{counter, histogram};
use rayon::prelude::*;
use rsan_clock::Tid;
use rsan_shadow::{AccessKind, StackId};
use rsan_symbolize::{DataLocation, SymbolizedFrame, Symbolizer};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::Config;
use crate::heap::HeapBlock;
use crate::stack::StackDepot;
use crate::suppress::Suppressor;
use crate::thread::ThreadInfo;

/// One side of a race.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportAccess {
    pub tid: Tid,
    pub kind: AccessKind,
    pub addr: u64,
    pub size: u64,
    pub stack: StackId,
}

impl ReportAccess {
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }
}

/// What the racy address is known to be, before symbolization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationHint {
    Heap(HeapBlock),
    Stack(Tid),
    /// Ask the symbolizer for an enclosing global.
    Unknown,
}

/// A detected race, with raw stacks.
#[derive(Clone, Debug)]
pub struct RaceReport {
    pub current: ReportAccess,
    pub previous: ReportAccess,
    pub location: LocationHint,
    /// Non-main threads mentioned by the report.
    pub threads: Vec<ThreadInfo>,
}

impl RaceReport {
    /// Smallest address range covering both accesses.
    #[must_use]
    pub fn range(&self) -> (u64, u64) {
        (
            self.current.addr.min(self.previous.addr),
            self.current.end().max(self.previous.end()),
        )
    }
}

/// Resolved location of the racy memory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Global(DataLocation),
    Heap {
        block: HeapBlock,
        frames: Vec<SymbolizedFrame>,
    },
    Stack(Tid),
}

/// A report with every stack turned into frames.
#[derive(Clone, Debug)]
pub struct SymbolizedReport {
    pub current: ReportAccess,
    pub current_frames: Vec<SymbolizedFrame>,
    pub previous: ReportAccess,
    pub previous_frames: Vec<SymbolizedFrame>,
    pub location: Option<Location>,
    pub threads: Vec<(ThreadInfo, Vec<SymbolizedFrame>)>,
}

impl SymbolizedReport {
    /// Resolve every stack in `report`. Each distinct stack is one batched
    /// resolver call; stacks are symbolized in parallel.
    #[must_use]
    pub fn build(report: &RaceReport, depot: &StackDepot, symbolizer: &Symbolizer) -> Self {
        let heap_stack = match report.location {
            LocationHint::Heap(block) => block.stack,
            _ => StackId::EMPTY,
        };
        let mut stacks: Vec<StackId> = [report.current.stack, report.previous.stack, heap_stack]
            .into_iter()
            .chain(report.threads.iter().map(|t| t.creation_stack))
            .filter(|&id| id != StackId::EMPTY)
            .collect();
        stacks.sort_unstable_by_key(|id| id.raw());
        stacks.dedup();

        let resolved: FxHashMap<StackId, Vec<SymbolizedFrame>> = stacks
            .par_iter()
            .map(|&id| (id, symbolizer.symbolize_stack(&depot.get(id))))
            .collect();
        let frames = |id: StackId| -> Vec<SymbolizedFrame> {
            resolved.get(&id).cloned().unwrap_or_default()
        };

        let location = match report.location {
            LocationHint::Heap(block) => Some(Location::Heap {
                block,
                frames: frames(block.stack),
            }),
            LocationHint::Stack(tid) => Some(Location::Stack(tid)),
            LocationHint::Unknown => symbolizer
                .symbolize_data(report.current.addr)
                .map(Location::Global),
        };

        Self {
            current: report.current,
            current_frames: frames(report.current.stack),
            previous: report.previous,
            previous_frames: frames(report.previous.stack),
            location,
            threads: report
                .threads
                .iter()
                .map(|t| (t.clone(), frames(t.creation_stack)))
                .collect(),
        }
    }
}

/// Filters, symbolizes, renders and emits reports.
pub struct Reporter {
    name: String,
    color: bool,
    halt_on_error: bool,
    symbolizer: Symbolizer,
    suppressor: Suppressor,
    sink: Box<dyn ReportSink>,
    emitted: AtomicU64,
    suppressed: AtomicU64,
    halted: AtomicBool,
}

impl Reporter {
    #[must_use]
    pub fn new(config: &Config, sink: Box<dyn ReportSink>) -> Self {
        Self {
            name: config.report_name.clone(),
            color: config.color,
            halt_on_error: config.halt_on_error,
            symbolizer: config.symbolizer.build(),
            suppressor: Suppressor::new(
                config.suppress_equal_stacks,
                config.suppress_equal_addresses,
            ),
            sink,
            emitted: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
            halted: AtomicBool::new(false),
        }
    }

    /// Handle a detected race. Returns true if it was emitted.
    pub fn submit(&self, report: &RaceReport, depot: &StackDepot) -> bool {
        counter!("rsan_races_detected_total").increment(1);
        if self.is_halted() {
            return false;
        }
        if !self.suppressor.admit(report) {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            counter!("rsan_reports_suppressed_total").increment(1);
            debug!(
                addr = format_args!("{:#x}", report.current.addr),
                tid = %report.current.tid,
                "duplicate race suppressed"
            );
            return false;
        }

        // Only the first report is emitted once halting; concurrent
        // detections lose the claim.
        if self.halt_on_error
            && self
                .halted
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return false;
        }

        let symbolized = SymbolizedReport::build(report, depot, &self.symbolizer);
        #[allow(clippy::cast_precision_loss)]
        let frame_count = (symbolized.current_frames.len() + symbolized.previous_frames.len()) as f64;
        histogram!("rsan_report_frames").record(frame_count);

        let text = render(&symbolized, &self.name, self.color);
        self.sink.emit(&text);
        self.emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    #[must_use]
    pub fn races_reported(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn reports_suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn symbolizer(&self) -> &Symbolizer {
        &self.symbolizer
    }

    pub fn flush(&self) {
        self.sink.flush();
    }
}
