//! Text layout of a race report.

use std::fmt::{self, Write};

use console::style;
use rsan_clock::Tid;
use rsan_symbolize::SymbolizedFrame;

use super::{Location, ReportAccess, SymbolizedReport};

const SEPARATOR: &str = "==================";

/// Render `report` as the multi-line warning block.
#[must_use]
pub fn render(report: &SymbolizedReport, name: &str, color: bool) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_report(&mut out, report, name, Painter(color));
    out
}

#[derive(Clone, Copy)]
struct Painter(bool);

impl Painter {
    fn warning(self, text: &str) -> String {
        if self.0 {
            style(text).red().bold().force_styling(true).to_string()
        } else {
            text.to_string()
        }
    }

    fn access(self, text: &str) -> String {
        if self.0 {
            style(text).blue().bold().force_styling(true).to_string()
        } else {
            text.to_string()
        }
    }

    fn location(self, text: &str) -> String {
        if self.0 {
            style(text).green().force_styling(true).to_string()
        } else {
            text.to_string()
        }
    }

    fn thread(self, text: &str) -> String {
        if self.0 {
            style(text).cyan().force_styling(true).to_string()
        } else {
            text.to_string()
        }
    }
}

fn write_report(
    out: &mut String,
    report: &SymbolizedReport,
    name: &str,
    paint: Painter,
) -> fmt::Result {
    writeln!(out, "{SEPARATOR}")?;
    writeln!(out, "{}", paint.warning(&format!("WARNING: {name}: data race")))?;

    writeln!(out, "{}", paint.access(&access_header("", &report.current)))?;
    write_frames(out, &report.current_frames)?;
    writeln!(out)?;

    writeln!(out, "{}", paint.access(&access_header("Previous ", &report.previous)))?;
    write_frames(out, &report.previous_frames)?;
    writeln!(out)?;

    if let Some(location) = &report.location {
        write_location(out, location, paint)?;
        writeln!(out)?;
    }

    for (thread, frames) in &report.threads {
        let label = thread
            .name
            .as_ref()
            .map_or_else(|| thread.tid.to_string(), |n| format!("{} '{n}'", thread.tid));
        let creator = thread.parent.map_or_else(|| "unknown thread".to_string(), who);
        writeln!(
            out,
            "{}",
            paint.thread(&format!(
                "  Thread {label} ({}) created by {creator} at:",
                thread.status.as_str()
            ))
        )?;
        write_frames(out, frames)?;
        writeln!(out)?;
    }

    let summary = report
        .current_frames
        .first()
        .map(summary_location)
        .unwrap_or_default();
    if summary.is_empty() {
        writeln!(out, "SUMMARY: {name}: data race")?;
    } else {
        writeln!(out, "SUMMARY: {name}: data race {summary}")?;
    }
    writeln!(out, "{SEPARATOR}")
}

fn who(tid: Tid) -> String {
    if tid.is_main() {
        "main thread".to_string()
    } else {
        format!("thread {tid}")
    }
}

fn access_header(prefix: &str, access: &ReportAccess) -> String {
    let kind = if prefix.is_empty() {
        access.kind.title()
    } else {
        access.kind.as_str()
    };
    format!(
        "  {prefix}{kind} of size {} at {:#x} by {}:",
        access.size,
        access.addr,
        who(access.tid)
    )
}

fn write_frames(out: &mut String, frames: &[SymbolizedFrame]) -> fmt::Result {
    if frames.is_empty() {
        return writeln!(out, "    [failed to restore the stack]");
    }
    for (i, frame) in frames.iter().enumerate() {
        writeln!(out, "    #{i} {frame}")?;
    }
    Ok(())
}

fn write_location(out: &mut String, location: &Location, paint: Painter) -> fmt::Result {
    match location {
        Location::Global(data) => {
            let mut line = format!(
                "  Location is global '{}' of size {} at {:#x}",
                data.name.as_deref().unwrap_or("??"),
                data.size,
                data.start
            );
            if let Some(module) = &data.module {
                let _ = write!(line, " ({module}+{:#x})", data.offset);
            }
            writeln!(out, "{}", paint.location(&line))
        }
        Location::Heap { block, frames } => {
            writeln!(
                out,
                "{}",
                paint.location(&format!(
                    "  Location is heap block of size {} at {:#x} allocated by {}:",
                    block.size,
                    block.addr,
                    who(block.tid)
                ))
            )?;
            write_frames(out, frames)
        }
        Location::Stack(tid) => writeln!(
            out,
            "{}",
            paint.location(&format!("  Location is stack of {}.", who(*tid)))
        ),
    }
}

/// `file:line in function`, falling back to module or raw address.
fn summary_location(frame: &SymbolizedFrame) -> String {
    let mut parts = Vec::with_capacity(2);
    if let Some(file) = &frame.file {
        if frame.line == 0 {
            parts.push(file.clone());
        } else {
            parts.push(format!("{file}:{}", frame.line));
        }
    } else if let Some(module) = &frame.module {
        parts.push(format!("({module}+{:#x})", frame.offset));
    } else if frame.function.is_none() {
        parts.push(format!("{:#x}", frame.pc));
    }
    if let Some(function) = &frame.function {
        parts.push(format!("in {function}"));
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use rsan_shadow::{AccessKind, StackId};
    use rsan_symbolize::DataLocation;

    use super::*;
    use crate::heap::HeapBlock;
    use crate::thread::{ThreadInfo, ThreadStatus};

    fn frame(function: &str, file: &str, line: u32) -> SymbolizedFrame {
        SymbolizedFrame {
            pc: 0x1000,
            module: Some("app".into()),
            offset: 0x1000,
            function: Some(function.into()),
            file: Some(file.into()),
            line,
            column: 0,
        }
    }

    fn access(tid: u32, kind: AccessKind, size: u64) -> ReportAccess {
        ReportAccess {
            tid: Tid::new(tid),
            kind,
            addr: 0x6010,
            size,
            stack: StackId::EMPTY,
        }
    }

    fn sample() -> SymbolizedReport {
        SymbolizedReport {
            current: access(2, AccessKind::Read, 1),
            current_frames: vec![frame("pthread_mutex_lock", "mutex.c", 3), frame("Thread2", "race.c", 20)],
            previous: access(1, AccessKind::Write, 1),
            previous_frames: vec![SymbolizedFrame::unresolved(0xbeef)],
            location: Some(Location::Global(DataLocation {
                name: Some("Mtx".into()),
                module: Some("app".into()),
                offset: 0x10,
                start: 0x6010,
                size: 40,
            })),
            threads: vec![(
                ThreadInfo {
                    tid: Tid::new(2),
                    status: ThreadStatus::Running,
                    parent: Some(Tid::MAIN),
                    name: None,
                    creation_stack: StackId::EMPTY,
                },
                vec![frame("main", "race.c", 29)],
            )],
        }
    }

    #[test]
    fn test_plain_layout() {
        let text = render(&sample(), "ThreadSanitizer", false);
        let expected = "\
==================
WARNING: ThreadSanitizer: data race
  Read of size 1 at 0x6010 by thread T2:
    #0 pthread_mutex_lock mutex.c:3 (app+0x1000)
    #1 Thread2 race.c:20 (app+0x1000)

  Previous write of size 1 at 0x6010 by thread T1:
    #0 0xbeef

  Location is global 'Mtx' of size 40 at 0x6010 (app+0x10)

  Thread T2 (running) created by main thread at:
    #0 main race.c:29 (app+0x1000)

SUMMARY: ThreadSanitizer: data race mutex.c:3 in pthread_mutex_lock
==================
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_main_thread_and_heap_location() {
        let mut report = sample();
        report.previous.tid = Tid::MAIN;
        report.current_frames.clear();
        report.threads.clear();
        report.location = Some(Location::Heap {
            block: HeapBlock {
                addr: 0x6000,
                size: 64,
                tid: Tid::new(3),
                stack: StackId::EMPTY,
            },
            frames: Vec::new(),
        });
        let text = render(&report, "RaceSanitizer", false);
        assert!(text.contains("Previous write of size 1 at 0x6010 by main thread:"));
        assert!(text.contains("    [failed to restore the stack]"));
        assert!(text.contains("Location is heap block of size 64 at 0x6000 allocated by thread T3:"));
        assert!(text.contains("SUMMARY: RaceSanitizer: data race\n"));
    }

    #[test]
    fn test_stack_location_and_named_thread() {
        let mut report = sample();
        report.location = Some(Location::Stack(Tid::new(1)));
        report.threads[0].0.name = Some("worker".into());
        report.threads[0].0.status = ThreadStatus::Joined;
        let text = render(&report, "RaceSanitizer", false);
        assert!(text.contains("  Location is stack of thread T1.\n"));
        assert!(text.contains("  Thread T2 'worker' (finished) created by main thread at:"));
    }

    #[test]
    fn test_color_codes_only_when_enabled() {
        assert!(!render(&sample(), "RaceSanitizer", false).contains('\u{1b}'));
        assert!(render(&sample(), "RaceSanitizer", true).contains('\u{1b}'));
    }

    #[test]
    fn test_summary_fallbacks() {
        assert_eq!(summary_location(&SymbolizedFrame::unresolved(0x42)), "0x42");
        let frame = SymbolizedFrame {
            module: Some("libc.so.6".into()),
            offset: 0x10,
            function: Some("memcpy".into()),
            ..SymbolizedFrame::unresolved(0x42)
        };
        assert_eq!(summary_location(&frame), "(libc.so.6+0x10) in memcpy");
    }
}
