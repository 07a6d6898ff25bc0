//! Shared helpers for integration tests.

#![allow(dead_code)]

use rsan::report::BufferSink;
use rsan::{Config, Context, SymbolizerConfig};
use rsan_symbolize::{AddressInfo, DataInfo, StaticResolver};

/// Addresses of the canonical mutex program.
pub mod mutex_program {
    pub const MTX: u64 = 0x60_1080;
    pub const PC_MAIN_CREATE_T1: u64 = 0x40_1200;
    pub const PC_MAIN_CREATE_T2: u64 = 0x40_1210;
    pub const PC_THREAD1: u64 = 0x40_1100;
    pub const PC_THREAD2: u64 = 0x40_1180;
    pub const PC_INIT: u64 = 0x40_1110;
    pub const PC_LOCK: u64 = 0x40_1190;
    pub const PC_UNLOCK: u64 = 0x40_11a0;
    pub const PC_SLEEP: u64 = 0x40_1120;
    pub const PC_DESTROY: u64 = 0x40_1130;
    pub const LIBC_INIT: u64 = 0x7f00_0000_1000;
    pub const LIBC_LOCK: u64 = 0x7f00_0000_2000;
    pub const LIBC_UNLOCK: u64 = 0x7f00_0000_3000;
    pub const LIBC_DESTROY: u64 = 0x7f00_0000_4000;
}

/// Symbols for [`mutex_program`].
pub fn mutex_symbols() -> StaticResolver {
    use mutex_program::*;

    let mut table = StaticResolver::new();
    let app = |pc: u64, function: &str, line: u32| {
        AddressInfo::new(pc)
            .with_function(function)
            .with_location("race_on_mutex.c", line, 0)
            .with_module("/tmp/race_on_mutex", pc - 0x40_0000)
    };
    let libc = |pc: u64, function: &str| {
        AddressInfo::new(pc)
            .with_function(function)
            .with_module("/lib/x86_64-linux-gnu/libc.so.6", pc - 0x7f00_0000_0000)
    };
    table.add_code(app(PC_THREAD1, "Thread1", 11));
    table.add_code(app(PC_INIT, "Thread1", 11));
    table.add_code(app(PC_SLEEP, "Thread1", 12));
    table.add_code(app(PC_DESTROY, "Thread1", 13));
    table.add_code(app(PC_THREAD2, "Thread2", 20));
    table.add_code(app(PC_LOCK, "Thread2", 20));
    table.add_code(app(PC_UNLOCK, "Thread2", 21));
    table.add_code(app(PC_MAIN_CREATE_T1, "main", 28));
    table.add_code(app(PC_MAIN_CREATE_T2, "main", 29));
    table.add_code(libc(LIBC_INIT, "pthread_mutex_init"));
    table.add_code(libc(LIBC_LOCK, "pthread_mutex_lock"));
    table.add_code(libc(LIBC_UNLOCK, "pthread_mutex_unlock"));
    table.add_code(libc(LIBC_DESTROY, "pthread_mutex_destroy"));
    table.add_data(DataInfo {
        module: Some("/tmp/race_on_mutex".into()),
        module_offset: MTX - 0x40_0000,
        name: Some("Mtx".into()),
        start: MTX,
        size: 40,
    });
    table
}

/// Session writing into a buffer.
pub fn session(config: Config) -> (Context, BufferSink) {
    let sink = BufferSink::new();
    (Context::with_sink(config, Box::new(sink.clone())), sink)
}

/// Default session without symbols.
pub fn plain_session() -> (Context, BufferSink) {
    session(Config::default().with_symbolizer(SymbolizerConfig::None))
}
