//! Dynamic data-race detection with vector-clock happens-before analysis.
//!
//! A [`Context`] receives instrumentation events (memory accesses, lock and
//! thread operations, heap lifecycle) and reports pairs of conflicting
//! accesses that no synchronization orders.
//!
//! ```
//! use rsan::{Config, Context};
//! use rsan_clock::Tid;
//!
//! let ctx = Context::new(Config::default().with_symbolizer(rsan::SymbolizerConfig::None));
//! let t1 = ctx.on_thread_start(Tid::MAIN, 0x400100);
//! ctx.on_write(t1, 0x6000, 4, 0x400200);
//! ctx.on_read(Tid::MAIN, 0x6000, 4, 0x400300);
//! assert_eq!(ctx.races_reported(), 1);
//! ```

pub mod config;
pub mod error;
pub mod heap;
pub mod metrics;
pub mod report;
pub mod stack;
pub mod suppress;
pub mod sync;
pub mod thread;
pub mod trace;

mod detector;

pub use config::{Config, SymbolizerConfig};
pub use detector::{Context, SessionSummary};
pub use error::{Error, Result};
