//! End-to-end detection scenarios driven through the public `Context` API.

mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use rsan::{Config, SymbolizerConfig};
use rsan_clock::Tid;

use common::{mutex_program, mutex_symbols, plain_session, session};

const X: u64 = 0x1000;
const Y: u64 = 0x2000;
const M: u64 = 0x8000;

#[test]
fn race_on_mutex_reports_init_against_lock() {
    use mutex_program::*;

    let config = Config::default()
        .with_report_name("ThreadSanitizer")
        .with_symbolizer(SymbolizerConfig::Static(mutex_symbols()));
    let (ctx, sink) = session(config);

    let t1 = ctx.on_thread_start(Tid::MAIN, PC_MAIN_CREATE_T1);
    let t2 = ctx.on_thread_start(Tid::MAIN, PC_MAIN_CREATE_T2);

    ctx.on_func_entry(t1, PC_INIT);
    ctx.on_mutex_create(t1, MTX, LIBC_INIT);
    ctx.on_func_exit(t1);
    ctx.on_func_entry(t1, PC_SLEEP);
    ctx.on_lock(t1, MTX, LIBC_LOCK);
    ctx.on_unlock(t1, MTX, LIBC_UNLOCK);
    ctx.on_func_exit(t1);

    ctx.on_func_entry(t2, PC_LOCK);
    ctx.on_lock(t2, MTX, LIBC_LOCK);
    ctx.on_func_exit(t2);
    ctx.on_func_entry(t2, PC_UNLOCK);
    ctx.on_unlock(t2, MTX, LIBC_UNLOCK);
    ctx.on_func_exit(t2);

    ctx.on_thread_join(Tid::MAIN, t1);
    ctx.on_thread_join(Tid::MAIN, t2);
    ctx.on_mutex_destroy(Tid::MAIN, MTX, PC_DESTROY);

    assert_eq!(ctx.races_reported(), 1);
    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let lines: Vec<&str> = reports[0].lines().collect();

    assert_eq!(lines[0], "==================");
    assert_eq!(lines[1], "WARNING: ThreadSanitizer: data race");
    assert_eq!(lines[2], "  Read of size 1 at 0x601080 by thread T2:");
    assert!(lines[3].starts_with("    #0 pthread_mutex_lock"));
    assert!(lines[4].starts_with("    #1 Thread2 race_on_mutex.c:20"));
    assert_eq!(lines[5], "");
    assert_eq!(lines[6], "  Previous write of size 1 at 0x601080 by thread T1:");
    assert!(lines[7].starts_with("    #0 pthread_mutex_init"));
    assert!(lines[8].starts_with("    #1 Thread1 race_on_mutex.c:11"));

    let text = &reports[0];
    assert!(text.contains("  Location is global 'Mtx' of size 40 at 0x601080 (race_on_mutex+0x201080)"));
    assert!(text.contains("  Thread T2 (running) created by main thread at:"));
    assert!(text.contains("  Thread T1 (running) created by main thread at:"));
    assert!(text.contains("    #0 main race_on_mutex.c:29"));
    assert!(text.contains("SUMMARY: ThreadSanitizer: data race (libc.so.6+0x2000) in pthread_mutex_lock\n"));
}

#[test]
fn single_thread_never_races() {
    let (ctx, sink) = plain_session();
    for i in 0..32 {
        ctx.on_write(Tid::MAIN, X + i, 1, 0x10);
        ctx.on_read(Tid::MAIN, X, 8, 0x20);
    }
    ctx.on_alloc(Tid::MAIN, Y, 64, 0x30);
    ctx.on_write(Tid::MAIN, Y, 64, 0x40);
    ctx.on_free(Tid::MAIN, Y);
    assert_eq!(ctx.races_reported(), 0);
    assert!(sink.is_empty());
}

#[test]
fn disjoint_bytes_of_one_word_do_not_race() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 4, 0x10);
    ctx.on_write(t2, X + 4, 4, 0x20);
    ctx.on_write(t1, X + 8, 1, 0x10);
    ctx.on_write(t2, X + 9, 7, 0x20);
    assert_eq!(ctx.races_reported(), 0);

    ctx.on_read(t2, X + 3, 2, 0x30);
    assert_eq!(ctx.races_reported(), 1);
}

#[test]
fn reads_never_race_with_reads() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_read(t1, X, 8, 0x10);
    ctx.on_read(t2, X, 8, 0x20);
    ctx.on_read(Tid::MAIN, X, 8, 0x30);
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn unavailable_symbolizer_still_reports() {
    let (ctx, sink) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0x400100);
    ctx.on_write(t1, X, 4, 0x400200);
    ctx.on_write(Tid::MAIN, X, 4, 0x400300);

    assert_eq!(ctx.races_reported(), 1);
    let text = sink.contents();
    assert!(text.contains("  Write of size 4 at 0x1000 by main thread:\n    #0 0x400300\n"));
    assert!(text.contains("  Previous write of size 4 at 0x1000 by thread T1:\n    #0 0x400200\n"));
    assert!(text.contains("SUMMARY: RaceSanitizer: data race 0x400300\n"));
}

#[test]
fn join_orders_child_before_parent() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 8, 0x10);
    ctx.on_thread_exit(t1);
    ctx.on_thread_join(Tid::MAIN, t1);
    ctx.on_write(Tid::MAIN, X, 8, 0x20);
    assert_eq!(ctx.races_reported(), 0);

    // Without a join the exit alone orders nothing.
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t2, Y, 8, 0x30);
    ctx.on_thread_exit(t2);
    ctx.on_write(Tid::MAIN, Y, 8, 0x40);
    assert_eq!(ctx.races_reported(), 1);
}

#[test]
fn lock_protected_accesses_do_not_race() {
    let (ctx, _) = plain_session();
    ctx.on_mutex_create(Tid::MAIN, M, 0x1);
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);

    for (tid, pc) in [(t1, 0x10), (t2, 0x20), (t1, 0x30), (t2, 0x40)] {
        ctx.on_lock(tid, M, pc);
        ctx.on_read(tid, X, 8, pc + 1);
        ctx.on_write(tid, X, 8, pc + 2);
        ctx.on_unlock(tid, M, pc + 3);
    }
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn recursive_lock_releases_on_outermost_unlock() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);

    ctx.on_lock(t1, M, 0x10);
    ctx.on_lock(t1, M, 0x11);
    ctx.on_unlock(t1, M, 0x12);
    ctx.on_write(t1, X, 4, 0x13);
    ctx.on_unlock(t1, M, 0x14);

    ctx.on_lock(t2, M, 0x20);
    ctx.on_write(t2, X, 4, 0x21);
    ctx.on_unlock(t2, M, 0x22);
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn destroy_and_recreate_erases_ordering() {
    let run = |recreate: bool| {
        let (ctx, _) = plain_session();
        let t1 = ctx.on_thread_start(Tid::MAIN, 0);
        let t2 = ctx.on_thread_start(Tid::MAIN, 0);
        ctx.on_write(t1, X, 4, 0x10);
        ctx.on_release(t1, M);
        if recreate {
            ctx.on_mutex_destroy(t1, M, 0x11);
            ctx.on_mutex_create(t1, M, 0x12);
        }
        ctx.on_acquire(t2, M);
        ctx.on_write(t2, X, 4, 0x20);
        ctx.races_reported()
    };
    assert_eq!(run(false), 0);
    assert_eq!(run(true), 1);
}

#[test]
fn release_acquire_is_transitive() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    let t3 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 8, 0x10);
    ctx.on_release(t1, M);
    ctx.on_acquire(t2, M);
    ctx.on_release(t2, M + 8);
    ctx.on_acquire(t3, M + 8);
    ctx.on_write(t3, X, 8, 0x30);
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn heap_reuse_after_free_does_not_race() {
    let (ctx, _) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_alloc(t1, Y, 64, 0x10);
    ctx.on_write(t1, Y + 8, 8, 0x11);
    ctx.on_free(t1, Y);

    ctx.on_alloc(Tid::MAIN, Y, 32, 0x20);
    ctx.on_write(Tid::MAIN, Y + 8, 8, 0x21);
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn heap_race_names_the_block() {
    let (ctx, sink) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0x100);
    ctx.on_alloc(t1, Y, 64, 0x10);
    ctx.on_write(t1, Y + 8, 8, 0x11);
    ctx.on_read(Tid::MAIN, Y + 8, 8, 0x20);

    assert_eq!(ctx.races_reported(), 1);
    let text = sink.contents();
    assert!(text.contains("  Location is heap block of size 64 at 0x2000 allocated by thread T1:\n    #0 0x10\n"));
    assert!(text.contains("  Thread T1 (running) created by main thread at:\n    #0 0x100\n"));
}

#[test]
fn stack_race_names_the_owner() {
    let (ctx, sink) = plain_session();
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.set_stack_bounds(t1, 0x7000_0000, 0x7001_0000);
    ctx.set_thread_name(t1, "worker");
    ctx.on_write(t1, 0x7000_fff0, 8, 0x10);
    ctx.on_read(Tid::MAIN, 0x7000_fff0, 8, 0x20);
    let text = sink.contents();
    assert!(text.contains("  Location is stack of thread T1.\n"));
    assert!(text.contains("  Thread T1 'worker' (running) created by main thread at:"));
}

#[test]
fn recycled_slot_never_manufactures_ordering() {
    let config = Config::default()
        .with_max_threads(2)
        .with_symbolizer(SymbolizerConfig::None);

    // Unjoined predecessor: its write stays concurrent with the new occupant.
    let (ctx, _) = session(config.clone());
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 8, 0x10);
    ctx.on_thread_exit(t1);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    assert_eq!(ctx.threads().slot_count(), 2);
    ctx.on_write(t2, X, 8, 0x20);
    assert_eq!(ctx.races_reported(), 1);

    // Joined predecessor: the parent learned its final epoch, the child
    // inherits it.
    let (ctx, _) = session(config);
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 8, 0x10);
    ctx.on_thread_join(Tid::MAIN, t1);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    assert_eq!(ctx.threads().slot_count(), 2);
    ctx.on_write(t2, X, 8, 0x20);
    ctx.on_write(Tid::MAIN, X, 8, 0x30);
    assert_eq!(ctx.races_reported(), 1);
}

#[test]
fn join_after_slot_reuse_is_ordered() {
    let (ctx, _) = session(
        Config::default()
            .with_max_threads(2)
            .with_symbolizer(SymbolizerConfig::None),
    );
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 8, 0x10);
    ctx.on_thread_exit(t1);

    // T2 takes T1's slot; main hears from T2 before joining T1.
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    assert_eq!(ctx.threads().slot_count(), 2);
    ctx.on_release(t2, 0x9000);
    ctx.on_acquire(Tid::MAIN, 0x9000);
    ctx.on_thread_join(Tid::MAIN, t1);

    ctx.on_write(Tid::MAIN, X, 8, 0x20);
    assert_eq!(ctx.races_reported(), 0);
}

#[test]
fn acquired_knowledge_survives_slot_reuse() {
    let (ctx, _) = session(
        Config::default()
            .with_max_threads(3)
            .with_symbolizer(SymbolizerConfig::None),
    );
    let writer = ctx.on_thread_start(Tid::MAIN, 0);
    let reader = ctx.on_thread_start(Tid::MAIN, 0);

    ctx.on_write(writer, X, 8, 0x10);
    ctx.on_release(writer, M);
    ctx.on_acquire(reader, M);
    ctx.on_thread_exit(writer);

    let successor = ctx.on_thread_start(Tid::MAIN, 0);
    assert_eq!(ctx.threads().slot_count(), 3);
    ctx.on_release(successor, 0x9000);
    ctx.on_acquire(reader, 0x9000);

    ctx.on_write(reader, X, 8, 0x20);
    assert_eq!(ctx.races_reported(), 0);

    // The successor itself never synchronized with the writer.
    ctx.on_read(successor, X, 8, 0x30);
    assert_eq!(ctx.races_reported(), 1);
}

#[test]
fn reader_lock_semantics() {
    let (ctx, _) = session(
        Config::default()
            .with_symbolizer(SymbolizerConfig::None)
            .with_suppress_equal_stacks(false),
    );
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    let t2 = ctx.on_thread_start(Tid::MAIN, 0);
    let t3 = ctx.on_thread_start(Tid::MAIN, 0);

    ctx.on_lock(t1, M, 0x10);
    ctx.on_write(t1, X, 8, 0x11);
    ctx.on_unlock(t1, M, 0x12);

    for (tid, pc) in [(t2, 0x20), (t3, 0x30)] {
        ctx.on_read_lock(tid, M, pc);
        ctx.on_read(tid, X, 8, pc + 1);
        ctx.on_read_unlock(tid, M, pc + 2);
    }
    assert_eq!(ctx.races_reported(), 0);

    // A writer after both readers is ordered after their reads.
    ctx.on_lock(t1, M, 0x13);
    ctx.on_write(t1, X, 8, 0x14);
    ctx.on_unlock(t1, M, 0x15);
    assert_eq!(ctx.races_reported(), 0);

    // Readers don't order each other.
    for (tid, pc) in [(t2, 0x40), (t3, 0x50)] {
        ctx.on_read_lock(tid, M, pc);
        ctx.on_write(tid, Y, 8, pc + 1);
        ctx.on_read_unlock(tid, M, pc + 2);
    }
    assert_eq!(ctx.races_reported(), 1);
}

#[test]
fn duplicate_reports_are_suppressed() {
    let drive = |config: Config| {
        let (ctx, sink) = session(config.with_symbolizer(SymbolizerConfig::None));
        let t1 = ctx.on_thread_start(Tid::MAIN, 0);
        let t2 = ctx.on_thread_start(Tid::MAIN, 0);
        // Same pair of stacks on two addresses, then a second pair on the first.
        ctx.on_write(t1, X, 4, 0x10);
        ctx.on_write(t2, X, 4, 0x20);
        ctx.on_write(t1, Y, 4, 0x10);
        ctx.on_write(t2, Y, 4, 0x20);
        ctx.on_read(t1, X, 4, 0x30);
        let summary = ctx.finish();
        (summary.races_reported, summary.reports_suppressed, sink.len())
    };

    assert_eq!(drive(Config::default()), (1, 2, 1));
    assert_eq!(
        drive(Config::default().with_suppress_equal_stacks(false)),
        (2, 1, 2)
    );
    assert_eq!(
        drive(Config::default().with_suppress_equal_addresses(false)),
        (2, 1, 2)
    );
    assert_eq!(
        drive(
            Config::default()
                .with_suppress_equal_stacks(false)
                .with_suppress_equal_addresses(false)
        ),
        (3, 0, 3)
    );
}

#[test]
fn halt_on_error_stops_reporting() {
    let (ctx, sink) = session(
        Config::default()
            .with_symbolizer(SymbolizerConfig::None)
            .with_halt_on_error(true),
    );
    let t1 = ctx.on_thread_start(Tid::MAIN, 0);
    ctx.on_write(t1, X, 4, 0x10);
    ctx.on_write(Tid::MAIN, X, 4, 0x20);
    assert!(ctx.should_halt());
    ctx.on_write(t1, Y, 4, 0x30);
    ctx.on_write(Tid::MAIN, Y, 4, 0x40);
    assert_eq!(ctx.races_reported(), 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn real_threads_with_mutex_are_clean() {
    let (ctx, sink) = plain_session();
    let ctx = Arc::new(ctx);
    let guard = Arc::new(Mutex::new(0u64));
    ctx.on_mutex_create(Tid::MAIN, M, 0x1);
    ctx.on_write(Tid::MAIN, X, 8, 0x2);

    let mut workers = Vec::new();
    for n in 0..4u64 {
        let tid = ctx.on_thread_start(Tid::MAIN, 0x100 + n);
        let ctx = Arc::clone(&ctx);
        let guard = Arc::clone(&guard);
        let handle = thread::spawn(move || {
            for i in 0..100u64 {
                let mut value = guard.lock().unwrap();
                ctx.on_lock(tid, M, 0x200 + i);
                ctx.on_read(tid, X, 8, 0x300);
                ctx.on_write(tid, X, 8, 0x301);
                *value += 1;
                ctx.on_unlock(tid, M, 0x400);
                drop(value);
            }
            ctx.on_thread_exit(tid);
        });
        workers.push((tid, handle));
    }
    for (tid, handle) in workers {
        handle.join().unwrap();
        ctx.on_thread_join(Tid::MAIN, tid);
    }
    ctx.on_read(Tid::MAIN, X, 8, 0x3);

    assert_eq!(*guard.lock().unwrap(), 400);
    assert_eq!(ctx.races_reported(), 0, "{}", sink.contents());
}

#[test]
fn real_threads_without_sync_race_once() {
    let (ctx, sink) = plain_session();
    let ctx = Arc::new(ctx);

    let mut workers = Vec::new();
    for n in 0..2u64 {
        let tid = ctx.on_thread_start(Tid::MAIN, 0x100 + n);
        let ctx = Arc::clone(&ctx);
        workers.push((
            tid,
            thread::spawn(move || {
                for _ in 0..50 {
                    ctx.on_write(tid, X, 8, 0x500 + n);
                }
            }),
        ));
    }
    for (tid, handle) in workers {
        handle.join().unwrap();
        ctx.on_thread_join(Tid::MAIN, tid);
    }

    assert_eq!(ctx.races_reported(), 1);
    assert_eq!(sink.len(), 1);
}
