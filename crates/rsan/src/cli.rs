//! CLI definitions and argument types.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for failure.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "rsan")]
#[command(about = "RaceSanitizer - happens-before data race detection over event traces")]
#[command(version)]
pub struct Cli {
    /// Show metrics summary after execution
    #[arg(long, global = true)]
    pub metrics: bool,

    /// Enable verbose output (sets RUST_LOG=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output (only show errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay an event trace through the detector and print race reports
    Replay {
        /// Trace file (`.zst` is decompressed)
        #[arg(value_name = "TRACE")]
        trace: PathBuf,

        #[command(flatten)]
        symbols: SymbolArgs,

        /// Tool name printed in reports
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        /// Stop after the first reported race
        #[arg(long)]
        halt_on_error: bool,

        /// Exit with the race exit code if any race was reported
        #[arg(long)]
        fail_on_race: bool,

        /// Exit code used when races were reported
        #[arg(long, value_name = "CODE")]
        exitcode: Option<i32>,

        /// Report races even if their stack pair was already reported
        #[arg(long)]
        no_suppress_equal_stacks: bool,

        /// Report races even if their address range was already reported
        #[arg(long)]
        no_suppress_equal_addresses: bool,

        /// Clock slots before retired slots are recycled
        #[arg(long, value_name = "N")]
        max_threads: Option<usize>,

        /// Stack depth remembered per access
        #[arg(long, value_name = "N")]
        history: Option<usize>,

        /// Colorize reports
        #[arg(long, value_enum)]
        color: Option<ColorArg>,
    },

    /// Resolve code addresses through the configured symbolizer
    Symbolize {
        /// Addresses (hex with `0x`, or decimal)
        #[arg(value_name = "PC", required = true)]
        pcs: Vec<String>,

        #[command(flatten)]
        symbols: SymbolArgs,

        /// Take symbols from this trace's `sym`/`global` lines
        #[arg(long, value_name = "TRACE", conflicts_with = "symbolizer")]
        trace: Option<PathBuf>,

        /// Resolve the addresses as data (globals) instead of code
        #[arg(long)]
        data: bool,
    },
}

/// Symbolizer selection shared by the subcommands.
#[derive(clap::Args, Clone, Debug, Default)]
pub struct SymbolArgs {
    /// External llvm-symbolizer-compatible binary
    #[arg(long, value_name = "PATH")]
    pub symbolizer: Option<PathBuf>,

    /// Loaded module as NAME:BASE:SIZE (hex); repeatable
    #[arg(long = "module", value_name = "NAME:BASE:SIZE")]
    pub modules: Vec<String>,

    /// Module map in /proc/<pid>/maps format
    #[arg(long, value_name = "FILE")]
    pub maps: Option<PathBuf>,

    /// addr2line binary used for known modules when no --symbolizer is given
    #[arg(long, value_name = "PATH", default_value = rsan_symbolize::DEFAULT_ADDR2LINE)]
    pub addr2line: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default)]
pub enum ColorArg {
    /// Color when stderr is a terminal
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorArg {
    pub fn enabled(self) -> bool {
        match self {
            Self::Auto => console::colors_enabled_stderr(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}
