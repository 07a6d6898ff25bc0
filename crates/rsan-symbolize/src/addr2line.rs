//! Fallback symbolization through an `addr2line`-compatible tool.
//!
//! Used when modules are known but no `llvm-symbolizer` is configured. The
//! tool runs once per module: module offsets go into a temp file that becomes
//! its stdin, and it answers with one function / `file:line` pair per offset.
//! It knows nothing about data, so globals stay unresolved.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use rustc_hash::FxHashMap;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::frame::{AddressInfo, DataInfo};
use crate::llvm::parse_location;
use crate::modules::ModuleMap;
use crate::resolver::SymbolResolver;
use crate::{Result, SymbolizeError};

/// Tool looked up on `PATH` when none is given.
pub const DEFAULT_ADDR2LINE: &str = "addr2line";

/// Resolver that shells out to `addr2line -f -C -e <module>`.
#[derive(Clone, Debug)]
pub struct Addr2LineResolver {
    tool: PathBuf,
    modules: ModuleMap,
}

impl Addr2LineResolver {
    #[must_use]
    pub fn new(tool: impl Into<PathBuf>, modules: ModuleMap) -> Self {
        Self {
            tool: tool.into(),
            modules,
        }
    }

    #[must_use]
    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Run the tool on `module` for `offsets` and return its stdout.
    fn run(&self, module: &str, offsets: &[u64]) -> Result<String> {
        let mut tmp = NamedTempFile::new()?;
        for offset in offsets {
            writeln!(tmp, "{offset:#x}")?;
        }
        tmp.flush()?;

        let tool = self.tool.display().to_string();
        let output = Command::new(&self.tool)
            .args(["-f", "-C", "-e", module])
            .stdin(Stdio::from(tmp.reopen()?))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| SymbolizeError::Spawn {
                tool: tool.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(SymbolizeError::ToolFailed { tool, stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SymbolResolver for Addr2LineResolver {
    fn name(&self) -> &'static str {
        "addr2line"
    }

    fn is_available(&self) -> bool {
        !self.modules.is_empty()
    }

    fn resolve_code(&self, pc: u64, max_frames: usize) -> Result<Vec<AddressInfo>> {
        Ok(self
            .resolve_code_batch(&[pc], max_frames)?
            .pop()
            .unwrap_or_default())
    }

    fn resolve_code_batch(&self, pcs: &[u64], max_frames: usize) -> Result<Vec<Vec<AddressInfo>>> {
        let mut out = vec![Vec::new(); pcs.len()];
        if max_frames == 0 {
            return Ok(out);
        }

        // (index into `pcs`, module offset), grouped by module path.
        let mut by_module: FxHashMap<&str, Vec<(usize, u64)>> = FxHashMap::default();
        for (idx, &pc) in pcs.iter().enumerate() {
            if let Some((module, offset)) = self.modules.find(pc) {
                by_module
                    .entry(module.path.as_str())
                    .or_default()
                    .push((idx, offset));
            }
        }

        for (module, queries) in by_module {
            let offsets: Vec<u64> = queries.iter().map(|&(_, offset)| offset).collect();
            let stdout = self.run(module, &offsets)?;
            debug!(tool = %self.tool.display(), module, queries = offsets.len(), "addr2line batch");

            for (&(idx, offset), reply) in queries.iter().zip(parse_output(&stdout)) {
                let Some((function, file, line)) = reply else {
                    continue;
                };
                out[idx].push(AddressInfo {
                    address: pcs[idx],
                    module: Some(module.to_string()),
                    module_offset: offset,
                    function,
                    file,
                    line,
                    column: 0,
                });
            }
        }
        Ok(out)
    }

    fn resolve_data(&self, _addr: u64) -> Result<Option<DataInfo>> {
        Ok(None)
    }
}

type Reply = Option<(Option<String>, Option<String>, u32)>;

/// One reply per queried offset: `(function, file, line)`, or `None` when the
/// tool knew neither.
fn parse_output(stdout: &str) -> Vec<Reply> {
    let lines: Vec<&str> = stdout.lines().collect();
    lines
        .chunks(2)
        .map(|pair| {
            let func = pair[0].trim();
            let loc = pair.get(1).map_or("??:0", |l| l.trim());
            // "file:line (discriminator N)"
            let loc = loc.split(" (").next().unwrap_or(loc);
            let (file, line, _) = parse_location(loc);
            let function = (!func.is_empty() && func != "??").then(|| func.to_string());
            (function.is_some() || file.is_some()).then_some((function, file, line))
        })
        .collect()
}
