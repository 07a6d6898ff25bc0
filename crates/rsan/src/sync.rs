//! Synchronization objects keyed by address.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use parking_lot::{Mutex, RwLock};
use rsan_clock::{Tid, VectorClock};
use rsan_shadow::StackId;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Release clocks and lock ownership of one primitive.
#[derive(Debug)]
pub struct SyncObject {
    pub addr: u64,
    /// Distinguishes identities that lived at the same address.
    pub uid: u64,
    pub creation_stack: StackId,
    /// Merged clocks of exclusive releases.
    clock: VectorClock,
    /// Merged clocks of shared (reader) releases.
    read_clock: VectorClock,
    owner: Option<Tid>,
    recursion: u32,
    readers: u32,
}

impl SyncObject {
    fn new(addr: u64, uid: u64, creation_stack: StackId) -> Self {
        Self {
            addr,
            uid,
            creation_stack,
            clock: VectorClock::new(),
            read_clock: VectorClock::new(),
            owner: None,
            recursion: 0,
            readers: 0,
        }
    }

    #[must_use]
    pub const fn clock(&self) -> &VectorClock {
        &self.clock
    }

    #[must_use]
    pub const fn read_clock(&self) -> &VectorClock {
        &self.read_clock
    }

    pub fn release(&mut self, thread_clock: &VectorClock) {
        self.clock.join(thread_clock);
    }

    pub fn release_shared(&mut self, thread_clock: &VectorClock) {
        self.read_clock.join(thread_clock);
    }

    /// Exclusive lock by `tid`. True on the outermost acquisition; recursive
    /// locks by the owner only bump the depth.
    pub fn lock(&mut self, tid: Tid) -> bool {
        if self.owner == Some(tid) {
            self.recursion += 1;
            return false;
        }
        if let Some(owner) = self.owner {
            debug!(addr = format_args!("{:#x}", self.addr), %owner, %tid, "lock of a held mutex");
        }
        self.owner = Some(tid);
        self.recursion = 1;
        true
    }

    /// Exclusive unlock by `tid`. True when the lock is fully released.
    /// Unlocking a mutex that `tid` doesn't hold still releases.
    pub fn unlock(&mut self, tid: Tid) -> bool {
        if self.owner != Some(tid) {
            debug!(addr = format_args!("{:#x}", self.addr), %tid, "unlock of a mutex not held by thread");
            self.owner = None;
            self.recursion = 0;
            return true;
        }
        self.recursion = self.recursion.saturating_sub(1);
        if self.recursion == 0 {
            self.owner = None;
            return true;
        }
        false
    }

    pub const fn lock_shared(&mut self) {
        self.readers += 1;
    }

    pub const fn unlock_shared(&mut self) {
        self.readers = self.readers.saturating_sub(1);
    }

    /// Threads currently holding the object (owner recursion plus readers).
    #[must_use]
    pub const fn held(&self) -> u32 {
        self.recursion + self.readers
    }

    #[must_use]
    pub const fn owner(&self) -> Option<Tid> {
        self.owner
    }
}

/// Address → live sync object.
pub struct SyncRegistry {
    objects: RwLock<FxHashMap<u64, Arc<Mutex<SyncObject>>>>,
    next_uid: AtomicU64,
}

impl SyncRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(FxHashMap::default()),
            next_uid: AtomicU64::new(1),
        }
    }

    fn fresh(&self, addr: u64, stack: StackId) -> Arc<Mutex<SyncObject>> {
        let uid = self.next_uid.fetch_add(1, Ordering::Relaxed);
        counter!("rsan_sync_objects_created_total").increment(1);
        debug!(addr = format_args!("{addr:#x}"), uid, "sync object created");
        Arc::new(Mutex::new(SyncObject::new(addr, uid, stack)))
    }

    /// Object at `addr`, created on first use.
    pub fn get_or_create(&self, addr: u64, stack: StackId) -> Arc<Mutex<SyncObject>> {
        if let Some(obj) = self.objects.read().get(&addr) {
            return Arc::clone(obj);
        }
        let mut objects = self.objects.write();
        Arc::clone(
            objects
                .entry(addr)
                .or_insert_with(|| self.fresh(addr, stack)),
        )
    }

    /// Explicit create: always a new identity, even over a live one.
    pub fn create(&self, addr: u64, stack: StackId) -> Arc<Mutex<SyncObject>> {
        let obj = self.fresh(addr, stack);
        if self.objects.write().insert(addr, Arc::clone(&obj)).is_some() {
            debug!(addr = format_args!("{addr:#x}"), "create over a live sync object");
        }
        obj
    }

    /// Drop the identity at `addr`.
    pub fn destroy(&self, addr: u64) -> Option<Arc<Mutex<SyncObject>>> {
        self.objects.write().remove(&addr)
    }

    #[must_use]
    pub fn get(&self, addr: u64) -> Option<Arc<Mutex<SyncObject>>> {
        self.objects.read().get(&addr).cloned()
    }

    /// Live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new()
    }
}
