//! Symbolize command.

use std::path::PathBuf;

use rsan::SymbolizerConfig;
use rsan::trace::read_trace;
use tracing::{error, warn};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

fn parse_addr(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

/// Handle the `symbolize` command.
///
/// Code addresses are treated as one stack, innermost first, and printed in
/// report frame format. With `data`, each address is looked up as a global.
pub fn cmd_symbolize(
    pcs: &[String],
    mut symbolizer: SymbolizerConfig,
    trace: Option<&PathBuf>,
    data: bool,
) -> i32 {
    let mut addrs = Vec::with_capacity(pcs.len());
    for text in pcs {
        let Some(addr) = parse_addr(text) else {
            error!(address = %text, "invalid address");
            return EXIT_FAILURE;
        };
        addrs.push(addr);
    }

    if let Some(path) = trace {
        match read_trace(path) {
            Ok(trace) => symbolizer = SymbolizerConfig::Static(trace.symbols),
            Err(e) => {
                error!(error = %e, path = %path.display(), "failed to read trace");
                return EXIT_FAILURE;
            }
        }
    }
    let symbolizer = symbolizer.build();
    if !symbolizer.is_available() {
        warn!("no symbolizer available, printing raw addresses");
    }

    if data {
        for addr in addrs {
            match symbolizer.symbolize_data(addr) {
                Some(global) => {
                    let name = global.name.as_deref().unwrap_or("??");
                    match &global.module {
                        Some(module) => println!(
                            "{addr:#x}: '{name}' of size {} at {:#x} ({module}+{:#x})",
                            global.size, global.start, global.offset
                        ),
                        None => println!(
                            "{addr:#x}: '{name}' of size {} at {:#x}",
                            global.size, global.start
                        ),
                    }
                }
                None => println!("{addr:#x}: ??"),
            }
        }
    } else {
        for (i, frame) in symbolizer.symbolize_stack(&addrs).iter().enumerate() {
            println!("    #{i} {frame}");
        }
    }
    EXIT_SUCCESS
}
