use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::SplitWhitespace;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use rsan_symbolize::{AddressInfo, DataInfo, StaticResolver};

use super::{Event, Op, Result, Trace, TraceError};

static SYM_PATTERN: OnceLock<Regex> = OnceLock::new();
static GLOBAL_PATTERN: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(source)?;
    Ok(cell.get_or_init(|| re))
}

/// Read a trace file. Files ending in `.zst` are decompressed first.
///
/// # Errors
///
/// Returns an error if the file can't be read or a line doesn't parse.
pub fn read_trace(path: &Path) -> Result<Trace> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut text = String::new();
    if path.extension().is_some_and(|ext| ext == "zst") {
        zstd::stream::Decoder::with_buffer(reader)?.read_to_string(&mut text)?;
    } else {
        reader.read_to_string(&mut text)?;
    }
    parse_trace(&text)
}

/// Parse trace text.
///
/// # Errors
///
/// Returns [`TraceError::Parse`] naming the first malformed line.
pub fn parse_trace(text: &str) -> Result<Trace> {
    let mut trace = Trace::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or_default().trim();
        if content.is_empty() {
            continue;
        }
        if content.starts_with("sym ") {
            parse_sym(line, content, &mut trace.symbols)?;
        } else if content.starts_with("global ") {
            parse_global(line, content, &mut trace.symbols)?;
        } else {
            trace.events.push(parse_event(line, content)?);
        }
    }
    Ok(trace)
}

/// Decimal, or hex with a `0x` prefix.
fn parse_num(token: &str) -> Option<u64> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

fn parse_thread(token: &str) -> Option<u32> {
    token.strip_prefix('T')?.parse().ok()
}

/// Whitespace tokens of one event line.
struct Tokens<'a> {
    line: usize,
    iter: SplitWhitespace<'a>,
}

impl<'a> Tokens<'a> {
    fn error(&self, message: impl Into<String>) -> TraceError {
        TraceError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn next(&mut self, what: &str) -> Result<&'a str> {
        self.iter
            .next()
            .ok_or_else(|| self.error(format!("missing {what}")))
    }

    fn num(&mut self, what: &str) -> Result<u64> {
        let token = self.next(what)?;
        parse_num(token).ok_or_else(|| self.error(format!("invalid {what} '{token}'")))
    }

    fn thread(&mut self, what: &str) -> Result<u32> {
        let token = self.next(what)?;
        parse_thread(token).ok_or_else(|| self.error(format!("invalid {what} '{token}'")))
    }

    /// Optional `key=value`; must be the next token if present.
    fn keyed<T>(&mut self, key: &str, parse: fn(&str) -> Option<T>) -> Result<Option<T>> {
        let Some(token) = self.iter.clone().next() else {
            return Ok(None);
        };
        let Some(value) = token.strip_prefix(key).and_then(|t| t.strip_prefix('=')) else {
            return Ok(None);
        };
        self.iter.next();
        parse(value)
            .map(Some)
            .ok_or_else(|| self.error(format!("invalid {key} '{value}'")))
    }

    fn pc(&mut self) -> Result<u64> {
        Ok(self.keyed("pc", parse_num)?.unwrap_or(0))
    }

    fn end(mut self) -> Result<()> {
        match self.iter.next() {
            Some(extra) => Err(self.error(format!("unexpected '{extra}'"))),
            None => Ok(()),
        }
    }
}

fn parse_event(line: usize, content: &str) -> Result<Event> {
    let mut tokens = Tokens {
        line,
        iter: content.split_whitespace(),
    };
    let thread = tokens.thread("thread")?;
    let keyword = tokens.next("operation")?;

    let op = match keyword {
        "start" => {
            let parent = tokens
                .keyed("parent", parse_thread)?
                .ok_or_else(|| tokens.error("start needs parent=T<n>"))?;
            Op::Start {
                parent,
                pc: tokens.pc()?,
            }
        }
        "read" | "write" => {
            let addr = tokens.num("address")?;
            let size = tokens.num("size")?;
            let pc = tokens.pc()?;
            if keyword == "read" {
                Op::Read { addr, size, pc }
            } else {
                Op::Write { addr, size, pc }
            }
        }
        "lock" | "unlock" | "rlock" | "runlock" | "mutex_create" | "mutex_destroy" => {
            let addr = tokens.num("address")?;
            let pc = tokens.pc()?;
            match keyword {
                "lock" => Op::Lock { addr, pc },
                "unlock" => Op::Unlock { addr, pc },
                "rlock" => Op::ReadLock { addr, pc },
                "runlock" => Op::ReadUnlock { addr, pc },
                "mutex_create" => Op::MutexCreate { addr, pc },
                _ => Op::MutexDestroy { addr, pc },
            }
        }
        "acquire" => Op::Acquire {
            addr: tokens.num("address")?,
        },
        "release" => Op::Release {
            addr: tokens.num("address")?,
        },
        "func_entry" => Op::FuncEntry {
            pc: tokens.num("pc")?,
        },
        "func_exit" => Op::FuncExit,
        "alloc" => Op::Alloc {
            addr: tokens.num("address")?,
            size: tokens.num("size")?,
            pc: tokens.pc()?,
        },
        "free" => Op::Free {
            addr: tokens.num("address")?,
        },
        "exit" => Op::Exit,
        "join" => Op::Join {
            child: tokens.thread("child thread")?,
        },
        "stack" => Op::StackBounds {
            lo: tokens.num("stack low")?,
            hi: tokens.num("stack high")?,
        },
        "name" => {
            let name: Vec<&str> = tokens.iter.by_ref().collect();
            if name.is_empty() {
                return Err(tokens.error("missing name"));
            }
            Op::Name(name.join(" "))
        }
        other => return Err(tokens.error(format!("unknown operation '{other}'"))),
    };
    tokens.end()?;
    Ok(Event { line, thread, op })
}

fn hex(caps: &Captures<'_>, idx: usize) -> Option<u64> {
    caps.get(idx).and_then(|m| parse_num(m.as_str()))
}

/// `sym 0xPC function [file:line[:col]] [module+0xOFF]`
fn parse_sym(line: usize, content: &str, symbols: &mut StaticResolver) -> Result<()> {
    let re = pattern(
        &SYM_PATTERN,
        r"^sym\s+(0x[0-9a-fA-F]+)\s+(\S+)(?:\s+([^\s:+]+):(\d+)(?::(\d+))?)?(?:\s+([^\s+]+)\+(0x[0-9a-fA-F]+))?\s*$",
    )?;
    let invalid = || TraceError::Parse {
        line,
        message: format!("malformed symbol line '{content}'"),
    };
    let caps = re.captures(content).ok_or_else(invalid)?;
    let pc = hex(&caps, 1).ok_or_else(invalid)?;

    let mut info = AddressInfo::new(pc).with_function(&caps[2]);
    if let Some(file) = caps.get(3) {
        let line_no = caps[4].parse().map_err(|_| invalid())?;
        let column = match caps.get(5) {
            Some(col) => col.as_str().parse().map_err(|_| invalid())?,
            None => 0,
        };
        info = info.with_location(file.as_str(), line_no, column);
    }
    if let Some(module) = caps.get(6) {
        info = info.with_module(module.as_str(), hex(&caps, 7).ok_or_else(invalid)?);
    }
    symbols.add_code(info);
    Ok(())
}

/// `global 0xADDR SIZE name [module[+0xOFF]]`
fn parse_global(line: usize, content: &str, symbols: &mut StaticResolver) -> Result<()> {
    let re = pattern(
        &GLOBAL_PATTERN,
        r"^global\s+(0x[0-9a-fA-F]+)\s+(0x[0-9a-fA-F]+|\d+)\s+(\S+)(?:\s+([^\s+]+)(?:\+(0x[0-9a-fA-F]+))?)?\s*$",
    )?;
    let invalid = || TraceError::Parse {
        line,
        message: format!("malformed global line '{content}'"),
    };
    let caps = re.captures(content).ok_or_else(invalid)?;
    symbols.add_data(DataInfo {
        module: caps.get(4).map(|m| m.as_str().to_string()),
        module_offset: hex(&caps, 5).unwrap_or_default(),
        name: Some(caps[3].to_string()),
        start: hex(&caps, 1).ok_or_else(invalid)?,
        size: hex(&caps, 2).ok_or_else(invalid)?,
    });
    Ok(())
}
