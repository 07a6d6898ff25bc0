//! Degrading front end over a [`SymbolResolver`].

use std::fmt;

use tracing::warn;

use crate::frame::{AddressInfo, DataLocation, SymbolizedFrame};
use crate::resolver::{NoopResolver, SymbolResolver};

/// Upper bound on inlined frames reported for one code address.
pub const MAX_ADDR_FRAMES: usize = 16;

/// Final path component of a module name.
#[must_use]
pub fn strip_module_name(module: &str) -> &str {
    module.rsplit('/').next().unwrap_or(module)
}

/// Turns raw addresses into frames. Never fails: anything the resolver can't
/// answer comes back as an address-only frame.
pub struct Symbolizer {
    resolver: Box<dyn SymbolResolver>,
}

impl Symbolizer {
    #[must_use]
    pub fn new(resolver: Box<dyn SymbolResolver>) -> Self {
        Self { resolver }
    }

    /// Symbolizer that resolves nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Box::new(NoopResolver))
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.resolver.is_available()
    }

    #[must_use]
    pub fn resolver_name(&self) -> &str {
        self.resolver.name()
    }

    /// Frames for `pc`, innermost first. Always at least one.
    #[must_use]
    pub fn symbolize_code(&self, pc: u64) -> Vec<SymbolizedFrame> {
        if !self.resolver.is_available() {
            return vec![SymbolizedFrame::unresolved(pc)];
        }
        match self.resolver.resolve_code(pc, MAX_ADDR_FRAMES) {
            Ok(infos) => to_frames(pc, infos),
            Err(err) => {
                warn!(resolver = self.resolver.name(), pc = format_args!("{pc:#x}"), %err, "symbolization failed");
                vec![SymbolizedFrame::unresolved(pc)]
            }
        }
    }

    /// Frames for a whole captured stack, in stack order.
    ///
    /// Uses one batched resolver call; if the batch fails every address
    /// degrades to an address-only frame.
    #[must_use]
    pub fn symbolize_stack(&self, pcs: &[u64]) -> Vec<SymbolizedFrame> {
        if !self.resolver.is_available() {
            return pcs.iter().copied().map(SymbolizedFrame::unresolved).collect();
        }
        match self.resolver.resolve_code_batch(pcs, MAX_ADDR_FRAMES) {
            Ok(batch) if batch.len() == pcs.len() => pcs
                .iter()
                .zip(batch)
                .flat_map(|(&pc, infos)| to_frames(pc, infos))
                .collect(),
            Ok(batch) => {
                warn!(
                    resolver = self.resolver.name(),
                    expected = pcs.len(),
                    got = batch.len(),
                    "resolver returned a short batch"
                );
                pcs.iter().copied().map(SymbolizedFrame::unresolved).collect()
            }
            Err(err) => {
                warn!(resolver = self.resolver.name(), %err, "stack symbolization failed");
                pcs.iter().copied().map(SymbolizedFrame::unresolved).collect()
            }
        }
    }

    /// Global variable enclosing `addr`, if the resolver knows one.
    #[must_use]
    pub fn symbolize_data(&self, addr: u64) -> Option<DataLocation> {
        if !self.resolver.is_available() {
            return None;
        }
        let info = match self.resolver.resolve_data(addr) {
            Ok(info) => info?,
            Err(err) => {
                warn!(resolver = self.resolver.name(), addr = format_args!("{addr:#x}"), %err, "data symbolization failed");
                return None;
            }
        };
        Some(DataLocation {
            name: info.name,
            module: info.module.as_deref().map(|m| strip_module_name(m).to_string()),
            offset: info.module_offset,
            start: info.start,
            size: info.size,
        })
    }
}

impl Default for Symbolizer {
    fn default() -> Self {
        Self::disabled()
    }
}

impl fmt::Debug for Symbolizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbolizer")
            .field("resolver", &self.resolver.name())
            .finish()
    }
}

fn to_frames(pc: u64, infos: Vec<AddressInfo>) -> Vec<SymbolizedFrame> {
    if infos.is_empty() {
        return vec![SymbolizedFrame::unresolved(pc)];
    }
    infos
        .into_iter()
        .take(MAX_ADDR_FRAMES)
        .map(|info| SymbolizedFrame {
            pc,
            module: info.module.as_deref().map(|m| strip_module_name(m).to_string()),
            offset: info.module_offset,
            function: info.function,
            file: info.file,
            line: info.line,
            column: info.column,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DataInfo;
    use crate::resolver::StaticResolver;
    use crate::{Result, SymbolizeError};

    struct Failing;

    impl SymbolResolver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn resolve_code(&self, _pc: u64, _max: usize) -> Result<Vec<AddressInfo>> {
            Err(SymbolizeError::Parse("boom".into()))
        }

        fn resolve_data(&self, _addr: u64) -> Result<Option<DataInfo>> {
            Err(SymbolizeError::Parse("boom".into()))
        }
    }

    fn table() -> StaticResolver {
        let mut r = StaticResolver::new();
        r.add_code(
            AddressInfo::new(0x10)
                .with_module("/tmp/build/race", 0x10)
                .with_function("Thread1")
                .with_location("race.c", 11, 3),
        );
        r.add_data(DataInfo {
            module: Some("/tmp/build/race".into()),
            module_offset: 0x200,
            name: Some("Global".into()),
            start: 0x6000,
            size: 4,
        });
        r
    }

    #[test]
    fn test_strip_module_name() {
        assert_eq!(strip_module_name("/usr/lib/libc.so.6"), "libc.so.6");
        assert_eq!(strip_module_name("app"), "app");
        assert_eq!(strip_module_name("dir/"), "");
    }

    #[test]
    fn test_disabled_gives_address_only() {
        let sym = Symbolizer::disabled();
        assert!(!sym.is_available());
        assert_eq!(sym.symbolize_code(0x42), vec![SymbolizedFrame::unresolved(0x42)]);
        assert!(sym.symbolize_data(0x6000).is_none());
    }

    #[test]
    fn test_static_resolution_strips_module() {
        let sym = Symbolizer::new(Box::new(table()));
        let frames = sym.symbolize_code(0x10);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].module.as_deref(), Some("race"));
        assert_eq!(frames[0].function.as_deref(), Some("Thread1"));

        let data = sym.symbolize_data(0x6002).unwrap();
        assert_eq!(data.name.as_deref(), Some("Global"));
        assert_eq!(data.module.as_deref(), Some("race"));
    }

    #[test]
    fn test_unknown_address_degrades() {
        let sym = Symbolizer::new(Box::new(table()));
        let frames = sym.symbolize_stack(&[0x99, 0x10]);
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].is_resolved());
        assert!(frames[1].is_resolved());
    }

    #[test]
    fn test_resolver_errors_degrade() {
        let sym = Symbolizer::new(Box::new(Failing));
        assert_eq!(sym.symbolize_code(0x5), vec![SymbolizedFrame::unresolved(0x5)]);
        assert_eq!(sym.symbolize_stack(&[1, 2]).len(), 2);
        assert!(sym.symbolize_data(0x5).is_none());
    }

    #[test]
    fn test_frame_cap() {
        let mut r = StaticResolver::new();
        for i in 0..40 {
            r.add_code(AddressInfo::new(0x1).with_function(&format!("f{i}")));
        }
        let sym = Symbolizer::new(Box::new(r));
        assert_eq!(sym.symbolize_code(0x1).len(), MAX_ADDR_FRAMES);
    }
}
