//! Live heap blocks, used to describe heap locations in reports.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use rsan_clock::Tid;
use rsan_shadow::StackId;

/// An allocation seen through `on_alloc`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapBlock {
    pub addr: u64,
    pub size: u64,
    /// Allocating thread.
    pub tid: Tid,
    pub stack: StackId,
}

impl HeapBlock {
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr - self.addr < self.size
    }
}

#[derive(Default)]
pub struct HeapRegistry {
    blocks: RwLock<BTreeMap<u64, HeapBlock>>,
}

impl HeapRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a block. A block already starting at the same address is
    /// replaced.
    pub fn alloc(&self, block: HeapBlock) {
        self.blocks.write().insert(block.addr, block);
    }

    /// Forget the block starting at `addr`.
    pub fn free(&self, addr: u64) -> Option<HeapBlock> {
        self.blocks.write().remove(&addr)
    }

    /// Live block containing `addr`.
    #[must_use]
    pub fn find(&self, addr: u64) -> Option<HeapBlock> {
        self.blocks
            .read()
            .range(..=addr)
            .next_back()
            .map(|(_, block)| *block)
            .filter(|block| block.contains(addr))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.read().is_empty()
    }
}
