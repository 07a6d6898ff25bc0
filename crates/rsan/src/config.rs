//! Detector configuration.

use std::path::PathBuf;

use rsan_symbolize::{
    Addr2LineResolver, LlvmSymbolizer, ModuleMap, NoopResolver, StaticResolver, Symbolizer,
};

use crate::{Error, Result};

/// Environment variable holding `key=value` option overrides.
pub const OPTIONS_ENV: &str = "RSAN_OPTIONS";

/// Exit status used when races were reported and the caller asked to fail.
pub const DEFAULT_EXITCODE: i32 = 66;

/// Where symbol information comes from.
#[derive(Clone, Debug, Default)]
pub enum SymbolizerConfig {
    /// No resolver: frames show addresses only.
    #[default]
    None,
    /// External `llvm-symbolizer`-compatible binary.
    External { path: PathBuf, modules: ModuleMap },
    /// `addr2line` over known modules: code locations only.
    Addr2Line { path: PathBuf, modules: ModuleMap },
    /// Symbols known up front.
    Static(StaticResolver),
}

impl SymbolizerConfig {
    /// Instantiate the configured resolver.
    #[must_use]
    pub fn build(&self) -> Symbolizer {
        match self {
            Self::None => Symbolizer::new(Box::new(NoopResolver)),
            Self::External { path, modules } => {
                Symbolizer::new(Box::new(LlvmSymbolizer::new(path.clone(), modules.clone())))
            }
            Self::Addr2Line { path, modules } => {
                Symbolizer::new(Box::new(Addr2LineResolver::new(path.clone(), modules.clone())))
            }
            Self::Static(table) => Symbolizer::new(Box::new(table.clone())),
        }
    }
}

/// Runtime configuration of a detection session.
#[derive(Clone, Debug)]
pub struct Config {
    /// Tool name printed in report headers and summaries.
    pub report_name: String,
    /// Suppress a report whose pair of stacks was already reported.
    pub suppress_equal_stacks: bool,
    /// Suppress a report whose address range overlaps an already reported one.
    pub suppress_equal_addresses: bool,
    /// Stop the session after the first emitted report.
    pub halt_on_error: bool,
    /// Exit status when races were reported.
    pub exitcode: i32,
    /// Slot table size; older retired slots are recycled beyond this.
    pub max_threads: usize,
    /// Call-stack depth remembered per access.
    pub history: usize,
    /// Colorize reports.
    pub color: bool,
    /// Symbol resolver selection.
    pub symbolizer: SymbolizerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            report_name: "RaceSanitizer".to_string(),
            suppress_equal_stacks: true,
            suppress_equal_addresses: true,
            halt_on_error: false,
            exitcode: DEFAULT_EXITCODE,
            max_threads: 8192,
            history: 64,
            color: false,
            symbolizer: SymbolizerConfig::None,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RSAN_OPTIONS`, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable contains an unknown key or a value
    /// that doesn't parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(options) = std::env::var(OPTIONS_ENV) {
            config.apply_options(&options)?;
        }
        Ok(config)
    }

    /// Apply `key=value` pairs separated by whitespace or `:`.
    ///
    /// # Errors
    ///
    /// Returns an error on unknown keys, missing `=`, or malformed values.
    /// Options before the failing one stay applied.
    pub fn apply_options(&mut self, options: &str) -> Result<()> {
        for item in options
            .split(|c: char| c.is_whitespace() || c == ':')
            .filter(|s| !s.is_empty())
        {
            let Some((key, value)) = item.split_once('=') else {
                return Err(Error::InvalidOption {
                    key: item.to_string(),
                    reason: "expected key=value".to_string(),
                });
            };
            self.apply_option(key, value)?;
        }
        Ok(())
    }

    fn apply_option(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "report_name" => self.report_name = value.to_string(),
            "suppress_equal_stacks" => self.suppress_equal_stacks = parse_bool(key, value)?,
            "suppress_equal_addresses" => self.suppress_equal_addresses = parse_bool(key, value)?,
            "halt_on_error" => self.halt_on_error = parse_bool(key, value)?,
            "exitcode" => self.exitcode = parse_num(key, value)?,
            "max_threads" => self.max_threads = parse_num::<usize>(key, value)?.max(1),
            "history_size" => self.history = parse_num(key, value)?,
            "color" => {
                self.color = match value {
                    "always" => true,
                    "never" => false,
                    "auto" => console::colors_enabled_stderr(),
                    _ => parse_bool(key, value)?,
                }
            }
            "external_symbolizer_path" => {
                let modules = match &self.symbolizer {
                    SymbolizerConfig::External { modules, .. }
                    | SymbolizerConfig::Addr2Line { modules, .. } => modules.clone(),
                    _ => ModuleMap::new(),
                };
                self.symbolizer = if value.is_empty() {
                    SymbolizerConfig::None
                } else {
                    SymbolizerConfig::External {
                        path: PathBuf::from(value),
                        modules,
                    }
                };
            }
            _ => return Err(Error::UnknownOption(key.to_string())),
        }
        Ok(())
    }

    /// Set the tool name used in reports.
    #[must_use]
    pub fn with_report_name(mut self, name: &str) -> Self {
        self.report_name = name.to_string();
        self
    }

    #[must_use]
    pub const fn with_suppress_equal_stacks(mut self, enabled: bool) -> Self {
        self.suppress_equal_stacks = enabled;
        self
    }

    #[must_use]
    pub const fn with_suppress_equal_addresses(mut self, enabled: bool) -> Self {
        self.suppress_equal_addresses = enabled;
        self
    }

    #[must_use]
    pub const fn with_halt_on_error(mut self, enabled: bool) -> Self {
        self.halt_on_error = enabled;
        self
    }

    #[must_use]
    pub const fn with_exitcode(mut self, code: i32) -> Self {
        self.exitcode = code;
        self
    }

    /// Bound the slot table. Zero is treated as one.
    #[must_use]
    pub fn with_max_threads(mut self, max: usize) -> Self {
        self.max_threads = max.max(1);
        self
    }

    #[must_use]
    pub const fn with_history(mut self, depth: usize) -> Self {
        self.history = depth;
        self
    }

    #[must_use]
    pub const fn with_color(mut self, enabled: bool) -> Self {
        self.color = enabled;
        self
    }

    #[must_use]
    pub fn with_symbolizer(mut self, symbolizer: SymbolizerConfig) -> Self {
        self.symbolizer = symbolizer;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Error::InvalidOption {
            key: key.to_string(),
            reason: format!("'{value}' is not a boolean"),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidOption {
        key: key.to_string(),
        reason: format!("'{value}' is not a number"),
    })
}
