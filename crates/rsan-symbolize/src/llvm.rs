//! External symbolizer driven through `llvm-symbolizer`.
//!
//! Queries are written to a temp file (one `CODE`/`DATA` request per line)
//! which becomes the tool's stdin. Output blocks are separated by blank lines.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::frame::{AddressInfo, DataInfo};
use crate::modules::ModuleMap;
use crate::resolver::SymbolResolver;
use crate::{Result, SymbolizeError};

/// Resolver that shells out to an `llvm-symbolizer`-compatible binary.
#[derive(Clone, Debug)]
pub struct LlvmSymbolizer {
    tool: PathBuf,
    modules: ModuleMap,
}

impl LlvmSymbolizer {
    /// Create a symbolizer for addresses inside `modules`.
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

    #[must_use]
    pub const fn modules(&self) -> &ModuleMap {
        &self.modules
    }

    /// Run the tool over `queries` and return its stdout.
    fn run(&self, queries: &[String]) -> Result<String> {
        let mut tmp = NamedTempFile::new()?;
        for q in queries {
            writeln!(tmp, "{q}")?;
        }
        tmp.flush()?;

        let tool = self.tool.display().to_string();
        let output = Command::new(&self.tool)
            .args(["--inlining=true", "--demangle=true", "--functions=linkage"])
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

impl SymbolResolver for LlvmSymbolizer {
    fn name(&self) -> &'static str {
        "llvm-symbolizer"
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
        // Addresses outside every module are answered locally with nothing.
        let mut queries = Vec::new();
        let mut located = Vec::with_capacity(pcs.len());
        for &pc in pcs {
            match self.modules.find(pc) {
                Some((module, offset)) => {
                    queries.push(format!("CODE \"{}\" {offset:#x}", module.path));
                    located.push(Some((module.path.clone(), offset)));
                }
                None => located.push(None),
            }
        }
        if queries.is_empty() {
            return Ok(vec![Vec::new(); pcs.len()]);
        }

        let stdout = self.run(&queries)?;
        let mut blocks = parse_code_output(&stdout).into_iter();
        debug!(tool = %self.tool.display(), queries = queries.len(), "symbolized code batch");

        let mut out = Vec::with_capacity(pcs.len());
        for (&pc, loc) in pcs.iter().zip(located) {
            let Some((module, offset)) = loc else {
                out.push(Vec::new());
                continue;
            };
            let frames = blocks
                .next()
                .unwrap_or_default()
                .into_iter()
                .take(max_frames)
                .map(|(function, file, line, column)| AddressInfo {
                    address: pc,
                    module: Some(module.clone()),
                    module_offset: offset,
                    function,
                    file,
                    line,
                    column,
                })
                .collect();
            out.push(frames);
        }
        Ok(out)
    }

    fn resolve_data(&self, addr: u64) -> Result<Option<DataInfo>> {
        let Some((module, offset)) = self.modules.find(addr) else {
            return Ok(None);
        };
        let base = addr - offset;
        let stdout = self.run(&[format!("DATA \"{}\" {offset:#x}", module.path)])?;
        Ok(parse_data_output(&stdout).map(|(name, start, size)| DataInfo {
            module: Some(module.path.clone()),
            module_offset: offset,
            name: Some(name),
            start: base + start,
            size,
        }))
    }
}

type CodeLine = (Option<String>, Option<String>, u32, u32);

/// Split tool output into per-query blocks of `(function, file, line, column)`.
fn parse_code_output(stdout: &str) -> Vec<Vec<CodeLine>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    let mut lines = stdout.lines();
    while let Some(func) = lines.next() {
        let func = func.trim();
        if func.is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        let loc = lines.next().unwrap_or("??:0:0").trim();
        let (file, line, column) = parse_location(loc);
        let function = (func != "??").then(|| func.to_string());
        if function.is_some() || file.is_some() {
            current.push((function, file, line, column));
        } else {
            // Keep the block boundary even when nothing resolved.
            current.push((None, None, 0, 0));
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    for block in &mut blocks {
        block.retain(|(f, file, _, _)| f.is_some() || file.is_some());
    }
    blocks
}

/// Parse `file:line[:column]`. Unknown parts come back as `None` / 0.
pub fn parse_location(loc: &str) -> (Option<String>, u32, u32) {
    let mut parts = loc.rsplitn(3, ':');
    let last = parts.next().unwrap_or("");
    let middle = parts.next();
    let first = parts.next();
    let (file, line, column) = match (first, middle) {
        (Some(file), Some(line)) => (file, line.parse().unwrap_or(0), last.parse().unwrap_or(0)),
        (None, Some(file)) => (file, last.parse().unwrap_or(0), 0),
        _ => (last, 0, 0),
    };
    let file = (!file.is_empty() && file != "??").then(|| file.to_string());
    (file, line, column)
}

/// Parse a data reply: `name` then `start size`.
fn parse_data_output(stdout: &str) -> Option<(String, u64, u64)> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let name = lines.next()?;
    if name == "??" {
        return None;
    }
    let mut nums = lines.next()?.split_whitespace();
    let start = nums.next()?.parse().ok()?;
    let size = nums.next()?.parse().ok()?;
    Some((name.to_string(), start, size))
}
