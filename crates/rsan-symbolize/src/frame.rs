//! Resolver output and report-ready frame types.

use std::fmt;

/// One (possibly inlined) source location for a code address, as returned by
/// a resolver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AddressInfo {
    pub address: u64,
    /// Module path as the resolver knows it.
    pub module: Option<String>,
    pub module_offset: u64,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl AddressInfo {
    #[must_use]
    pub fn new(address: u64) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: &str, offset: u64) -> Self {
        self.module = Some(module.to_string());
        self.module_offset = offset;
        self
    }

    #[must_use]
    pub fn with_function(mut self, function: &str) -> Self {
        self.function = Some(function.to_string());
        self
    }

    #[must_use]
    pub fn with_location(mut self, file: &str, line: u32, column: u32) -> Self {
        self.file = Some(file.to_string());
        self.line = line;
        self.column = column;
        self
    }
}

/// Global variable description for a data address, as returned by a resolver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataInfo {
    pub module: Option<String>,
    pub module_offset: u64,
    pub name: Option<String>,
    pub start: u64,
    pub size: u64,
}

/// A stack frame ready for rendering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SymbolizedFrame {
    pub pc: u64,
    /// Module base name (no directories).
    pub module: Option<String>,
    pub offset: u64,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl SymbolizedFrame {
    /// Frame carrying only the address.
    #[must_use]
    pub fn unresolved(pc: u64) -> Self {
        Self {
            pc,
            ..Self::default()
        }
    }

    /// True when a function name or a source file is known.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.function.is_some() || self.file.is_some()
    }
}

impl fmt::Display for SymbolizedFrame {
    /// `function file:line[:col] (module+0xoff)`, dropping whatever is unknown.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(func) = &self.function {
            f.write_str(func)?;
            wrote = true;
        }
        if let Some(file) = &self.file {
            if wrote {
                f.write_str(" ")?;
            }
            write!(f, "{file}")?;
            if self.line != 0 {
                write!(f, ":{}", self.line)?;
                if self.column != 0 {
                    write!(f, ":{}", self.column)?;
                }
            }
            wrote = true;
        }
        if !wrote {
            write!(f, "{:#x}", self.pc)?;
        }
        if let Some(module) = &self.module {
            write!(f, " ({module}+{:#x})", self.offset)?;
        }
        Ok(())
    }
}

/// Global variable that encloses a data address.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataLocation {
    pub name: Option<String>,
    /// Module base name (no directories).
    pub module: Option<String>,
    pub offset: u64,
    pub start: u64,
    pub size: u64,
}
