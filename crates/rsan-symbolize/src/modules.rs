//! Loaded-module map used to turn absolute addresses into module offsets.

use crate::{Result, SymbolizeError};

/// A mapped executable or shared library.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Module {
    pub path: String,
    pub base: u64,
    pub size: u64,
}

impl Module {
    #[must_use]
    pub fn new(path: &str, base: u64, size: u64) -> Self {
        Self {
            path: path.to_string(),
            base,
            size,
        }
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }

    /// Parse `NAME:BASE:SIZE` (base and size in hex, `0x` optional).
    ///
    /// # Errors
    ///
    /// Returns an error if the spec does not have three fields or the numbers
    /// don't parse.
    pub fn parse_spec(spec: &str) -> Result<Self> {
        let invalid = || SymbolizeError::InvalidModuleSpec(spec.to_string());
        let mut parts = spec.rsplitn(3, ':');
        let size = parts.next().and_then(parse_hex).ok_or_else(invalid)?;
        let base = parts.next().and_then(parse_hex).ok_or_else(invalid)?;
        let path = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        Ok(Self::new(path, base, size))
    }
}

fn parse_hex(s: &str) -> Option<u64> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u64::from_str_radix(digits, 16).ok()
}

/// Set of loaded modules.
#[derive(Clone, Debug, Default)]
pub struct ModuleMap {
    modules: Vec<Module>,
}

impl ModuleMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, module: Module) {
        self.modules.push(module);
    }

    /// Module containing `addr` and the offset inside it.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<(&Module, u64)> {
        self.modules
            .iter()
            .find(|m| m.contains(addr))
            .map(|m| (m, addr - m.base))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Build from `/proc/<pid>/maps` text.
    ///
    /// Mappings backed by a file become modules; consecutive mappings of the
    /// same file are folded into one module whose base is the first mapping's
    /// start.
    #[must_use]
    pub fn from_proc_maps(text: &str) -> Self {
        let mut map = Self::new();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            let Some(range) = fields.next() else {
                continue;
            };
            // perms, offset, dev, inode
            let Some(path) = fields.nth(4) else {
                continue;
            };
            if !path.starts_with('/') {
                continue;
            }
            let Some((lo, hi)) = range.split_once('-') else {
                continue;
            };
            let (Some(lo), Some(hi)) = (parse_hex(lo), parse_hex(hi)) else {
                continue;
            };
            match map.modules.last_mut() {
                Some(last) if last.path == path => {
                    last.size = hi.saturating_sub(last.base);
                }
                _ => map.add(Module::new(path, lo, hi.saturating_sub(lo))),
            }
        }
        map
    }
}

impl FromIterator<Module> for ModuleMap {
    fn from_iter<I: IntoIterator<Item = Module>>(iter: I) -> Self {
        Self {
            modules: iter.into_iter().collect(),
        }
    }
}
