use thiserror::Error;

use crate::trace::TraceError;

/// Top-level errors. The detection engine itself never fails; these come from
/// configuration, trace input and symbolizer setup.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace error: {0}")]
    Trace(#[from] TraceError),
    #[error("symbolizer error: {0}")]
    Symbolize(#[from] rsan_symbolize::SymbolizeError),
    #[error("invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },
    #[error("unknown option '{0}'")]
    UnknownOption(String),
}

pub type Result<T> = std::result::Result<T, Error>;
