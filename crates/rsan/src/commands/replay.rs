//! Replay command.

use std::path::Path;

use rsan::trace::{read_trace, replay};
use rsan::{Config, Context, SymbolizerConfig};
use tracing::{error, info, warn};

use crate::cli::{EXIT_FAILURE, EXIT_SUCCESS};

/// Handle the `replay` command.
///
/// Symbols declared in the trace are used unless a symbolizer or module map
/// was given on the command line.
pub fn cmd_replay(path: &Path, mut config: Config, from_cli: bool, fail_on_race: bool) -> i32 {
    let trace = match read_trace(path) {
        Ok(trace) => trace,
        Err(e) => {
            error!(error = %e, path = %path.display(), "failed to read trace");
            return EXIT_FAILURE;
        }
    };
    if !from_cli && trace.has_symbols() {
        config = config.with_symbolizer(SymbolizerConfig::Static(trace.symbols.clone()));
    }

    let exitcode = config.exitcode;
    let fail = fail_on_race || config.halt_on_error;
    let ctx = Context::new(config);
    if !ctx.symbolizer_available() {
        warn!("no symbolizer available, frames will show raw addresses");
    }

    let stats = match replay(&ctx, &trace) {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, path = %path.display(), "replay failed");
            ctx.finish();
            return EXIT_FAILURE;
        }
    };
    if let Some(line) = stats.halted_at {
        info!(line, "halted on first race");
    }

    let summary = ctx.finish();
    info!(
        events = stats.events,
        races = summary.races_reported,
        suppressed = summary.reports_suppressed,
        "replay complete"
    );
    if fail && summary.races_reported > 0 {
        exitcode
    } else {
        EXIT_SUCCESS
    }
}
