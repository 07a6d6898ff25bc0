//! Symbolization of code and data addresses for race reports.
//!
//! The engine never reads symbol tables itself. It talks to a
//! [`SymbolResolver`], chosen once at configuration time:
//!
//! - [`NoopResolver`] when no symbolizer is available (address-only output),
//! - [`LlvmSymbolizer`] to drive an external `llvm-symbolizer` binary,
//! - [`Addr2LineResolver`] when only the loaded modules are known (code
//!   addresses only, one `addr2line` run per module),
//! - [`StaticResolver`] for symbols known up front (tests, recorded traces).
//!
//! [`Symbolizer`] wraps the resolver and never fails: unresolvable addresses
//! degrade to frames that carry only the address.

mod addr2line;
mod frame;
mod llvm;
mod modules;
mod resolver;
mod symbolizer;

pub use addr2line::{Addr2LineResolver, DEFAULT_ADDR2LINE};
pub use frame::{AddressInfo, DataInfo, DataLocation, SymbolizedFrame};
pub use llvm::LlvmSymbolizer;
pub use modules::{Module, ModuleMap};
pub use resolver::{NoopResolver, StaticResolver, SymbolResolver};
pub use symbolizer::{MAX_ADDR_FRAMES, Symbolizer, strip_module_name};

use thiserror::Error;

/// Symbolization errors.
#[derive(Error, Debug)]
pub enum SymbolizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    #[error("{tool} failed: {stderr}")]
    ToolFailed { tool: String, stderr: String },
    #[error("invalid module spec '{0}' (expected NAME:BASE:SIZE)")]
    InvalidModuleSpec(String),
    #[error("unexpected symbolizer output: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, SymbolizeError>;
