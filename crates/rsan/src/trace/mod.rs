//! Textual event traces: a recorded instrumentation stream that can be
//! replayed into a [`Context`](crate::Context).
//!
//! One event per line, `#` starts a comment:
//!
//! ```text
//! T1 start parent=T0 pc=0x401000
//! T1 write 0x6010 4 pc=0x401120
//! T1 lock 0x6040 pc=0x401130
//! T0 join T1
//! sym 0x401120 worker race.c:12 app+0x1120
//! global 0x6010 4 counter app
//! ```

mod parse;
mod replay;

pub use parse::{parse_trace, read_trace};
pub use replay::{ReplayStats, replay};

use rsan_symbolize::StaticResolver;
use thiserror::Error;

/// Trace parsing and replay errors.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("line {line}: thread T{thread} was never started")]
    UnknownThread { line: usize, thread: u32 },
    #[error("line {line}: thread T{thread} started twice")]
    DuplicateThread { line: usize, thread: u32 },
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// Operation performed by one trace event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Start { parent: u32, pc: u64 },
    Read { addr: u64, size: u64, pc: u64 },
    Write { addr: u64, size: u64, pc: u64 },
    Lock { addr: u64, pc: u64 },
    Unlock { addr: u64, pc: u64 },
    ReadLock { addr: u64, pc: u64 },
    ReadUnlock { addr: u64, pc: u64 },
    MutexCreate { addr: u64, pc: u64 },
    MutexDestroy { addr: u64, pc: u64 },
    Acquire { addr: u64 },
    Release { addr: u64 },
    FuncEntry { pc: u64 },
    FuncExit,
    Alloc { addr: u64, size: u64, pc: u64 },
    Free { addr: u64 },
    Exit,
    Join { child: u32 },
    StackBounds { lo: u64, hi: u64 },
    Name(String),
}

/// One parsed event line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// 1-based source line.
    pub line: usize,
    /// Thread number as written in the trace (`T<n>`).
    pub thread: u32,
    pub op: Op,
}

/// A parsed trace: events in order plus the symbols it declares.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    pub events: Vec<Event>,
    pub symbols: StaticResolver,
}

impl Trace {
    /// Whether the trace declares any `sym` or `global` lines.
    #[must_use]
    pub fn has_symbols(&self) -> bool {
        !self.symbols.is_empty()
    }
}
