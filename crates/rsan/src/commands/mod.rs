//! Command implementations.

mod replay;
mod symbolize;

use rsan::{Config, SymbolizerConfig};
use rsan_symbolize::{Module, ModuleMap};
use tracing::error;

use crate::cli::{Cli, Commands, EXIT_FAILURE, SymbolArgs};

/// Dispatch CLI command to the appropriate handler.
pub fn run_command(cli: &Cli) -> i32 {
    match &cli.command {
        Commands::Replay { .. } => handle_replay(cli),
        Commands::Symbolize { .. } => handle_symbolize(cli),
    }
}

fn handle_replay(cli: &Cli) -> i32 {
    let Commands::Replay {
        trace,
        symbols,
        name,
        halt_on_error,
        fail_on_race,
        exitcode,
        no_suppress_equal_stacks,
        no_suppress_equal_addresses,
        max_threads,
        history,
        color,
    } = &cli.command
    else {
        unreachable!("replay command variant mismatch");
    };

    let mut config = match base_config(symbols) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let from_cli = symbols.symbolizer.is_some() || has_modules(symbols);
    if let Some(name) = name {
        config = config.with_report_name(name);
    }
    if *halt_on_error {
        config = config.with_halt_on_error(true);
    }
    if let Some(code) = exitcode {
        config = config.with_exitcode(*code);
    }
    if *no_suppress_equal_stacks {
        config = config.with_suppress_equal_stacks(false);
    }
    if *no_suppress_equal_addresses {
        config = config.with_suppress_equal_addresses(false);
    }
    if let Some(max) = max_threads {
        config = config.with_max_threads(*max);
    }
    if let Some(depth) = history {
        config = config.with_history(*depth);
    }
    if let Some(color) = color {
        config = config.with_color(color.enabled());
    }

    replay::cmd_replay(trace, config, from_cli, *fail_on_race)
}

fn handle_symbolize(cli: &Cli) -> i32 {
    let Commands::Symbolize {
        pcs,
        symbols,
        trace,
        data,
    } = &cli.command
    else {
        unreachable!("symbolize command variant mismatch");
    };

    let config = match base_config(symbols) {
        Ok(config) => config,
        Err(code) => return code,
    };
    symbolize::cmd_symbolize(pcs, config.symbolizer, trace.as_ref(), *data)
}

/// `RSAN_OPTIONS` defaults with the symbolizer flags applied. Known modules
/// without an external symbolizer fall back to `addr2line`.
fn base_config(symbols: &SymbolArgs) -> Result<Config, i32> {
    let mut config = Config::from_env().map_err(|e| {
        error!(error = %e, "invalid {}", rsan::config::OPTIONS_ENV);
        EXIT_FAILURE
    })?;
    let modules = module_map(symbols).map_err(|e| {
        error!(error = %e, "invalid module map");
        EXIT_FAILURE
    })?;
    if let Some(path) = &symbols.symbolizer {
        config = config.with_symbolizer(SymbolizerConfig::External {
            path: path.clone(),
            modules,
        });
    } else if !modules.is_empty() {
        config = config.with_symbolizer(SymbolizerConfig::Addr2Line {
            path: symbols.addr2line.clone(),
            modules,
        });
    }
    Ok(config)
}

fn has_modules(symbols: &SymbolArgs) -> bool {
    symbols.maps.is_some() || !symbols.modules.is_empty()
}

fn module_map(symbols: &SymbolArgs) -> rsan::Result<ModuleMap> {
    let mut map = match &symbols.maps {
        Some(path) => ModuleMap::from_proc_maps(&std::fs::read_to_string(path)?),
        None => ModuleMap::new(),
    };
    for spec in &symbols.modules {
        map.add(Module::parse_spec(spec)?);
    }
    Ok(map)
}
