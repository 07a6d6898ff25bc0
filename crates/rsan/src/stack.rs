//! Interned call stacks.

use std::sync::Arc;

use parking_lot::RwLock;
use rsan_shadow::StackId;
use rustc_hash::FxHashMap;

#[derive(Default)]
struct Depot {
    stacks: Vec<Arc<[u64]>>,
    index: FxHashMap<Arc<[u64]>, StackId>,
}

/// Deduplicating store of captured stacks (innermost frame first).
///
/// Identical stacks share one [`StackId`]; ids are never freed.
#[derive(Default)]
pub struct StackDepot {
    inner: RwLock<Depot>,
}

impl StackDepot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `pcs`. The empty stack is [`StackId::EMPTY`].
    pub fn intern(&self, pcs: &[u64]) -> StackId {
        if pcs.is_empty() {
            return StackId::EMPTY;
        }
        if let Some(&id) = self.inner.read().index.get(pcs) {
            return id;
        }
        let mut depot = self.inner.write();
        if let Some(&id) = depot.index.get(pcs) {
            return id;
        }
        let stack: Arc<[u64]> = Arc::from(pcs);
        let id = StackId::new(u32::try_from(depot.stacks.len() + 1).unwrap_or(u32::MAX));
        depot.stacks.push(Arc::clone(&stack));
        depot.index.insert(stack, id);
        id
    }

    /// Frames of `id`; empty for [`StackId::EMPTY`] or unknown ids.
    #[must_use]
    pub fn get(&self, id: StackId) -> Arc<[u64]> {
        let idx = id.raw() as usize;
        if idx == 0 {
            return Arc::from(Vec::new());
        }
        self.inner
            .read()
            .stacks
            .get(idx - 1)
            .cloned()
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Distinct stacks stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().stacks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
