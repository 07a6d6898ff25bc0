//! Symbol resolver abstraction and the simple implementations.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::frame::{AddressInfo, DataInfo};
use crate::Result;

/// External address-resolution service.
///
/// Implementations may be slow (spawning processes, reading debug info) but
/// must be callable from any thread.
pub trait SymbolResolver: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether this resolver can resolve anything at all.
    fn is_available(&self) -> bool {
        true
    }

    /// Source locations for `pc`, innermost inlined frame first, at most
    /// `max_frames` entries. An empty vector means "not resolvable".
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying service fails.
    fn resolve_code(&self, pc: u64, max_frames: usize) -> Result<Vec<AddressInfo>>;

    /// Resolve several addresses at once. The result has one entry per input.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying service fails.
    fn resolve_code_batch(&self, pcs: &[u64], max_frames: usize) -> Result<Vec<Vec<AddressInfo>>> {
        pcs.iter().map(|&pc| self.resolve_code(pc, max_frames)).collect()
    }

    /// Global variable enclosing `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying service fails.
    fn resolve_data(&self, addr: u64) -> Result<Option<DataInfo>>;
}

/// Resolver used when no symbolizer is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopResolver;

impl SymbolResolver for NoopResolver {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn resolve_code(&self, _pc: u64, _max_frames: usize) -> Result<Vec<AddressInfo>> {
        Ok(Vec::new())
    }

    fn resolve_data(&self, _addr: u64) -> Result<Option<DataInfo>> {
        Ok(None)
    }
}

/// Resolver backed by an in-memory symbol table.
///
/// Code symbols are keyed by exact address; data symbols cover
/// `[start, start + size)`.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    code: FxHashMap<u64, Vec<AddressInfo>>,
    data: BTreeMap<u64, DataInfo>,
}

impl StaticResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame for `info.address`. Calling this twice for the same
    /// address describes an inlined call chain, innermost first.
    pub fn add_code(&mut self, info: AddressInfo) {
        self.code.entry(info.address).or_default().push(info);
    }

    pub fn add_data(&mut self, info: DataInfo) {
        self.data.insert(info.start, info);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty() && self.data.is_empty()
    }
}

impl SymbolResolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve_code(&self, pc: u64, max_frames: usize) -> Result<Vec<AddressInfo>> {
        Ok(self
            .code
            .get(&pc)
            .map(|frames| frames.iter().take(max_frames).cloned().collect())
            .unwrap_or_default())
    }

    fn resolve_data(&self, addr: u64) -> Result<Option<DataInfo>> {
        Ok(self
            .data
            .range(..=addr)
            .next_back()
            .map(|(_, info)| info)
            .filter(|info| addr - info.start < info.size.max(1))
            .cloned())
    }
}
