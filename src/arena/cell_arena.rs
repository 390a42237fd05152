// Cell arena - subscription bookkeeping for reactive cells
//
// A cell's value lives in its `ReactiveCell<T>` handle; the arena only stores
// the set of effects subscribed to it. Computeds also own a cell node: their
// output node is what downstream effects subscribe to.
//
// Edges are stored on both sides (cell -> subscribers here, effect -> sources
// in the effect arena) so dropping either end is O(degree).

use parking_lot::RwLock;
use slab::Slab;

use super::EffectId;
use crate::hash::OrderedSet;

/// Index of a cell node in its runtime's arena.
///
/// Ids are only meaningful for the runtime that issued them. Once the owning
/// cell is dropped the slot may be reused.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CellId(u32);

impl CellId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-cell metadata stored in the arena.
#[derive(Debug, Default)]
pub(crate) struct CellNode {
    /// Effects that read this cell during their last run, in subscription order.
    pub(crate) subscribers: RwLock<OrderedSet<EffectId>>,
}

#[derive(Default)]
pub(crate) struct CellArena {
    slab: RwLock<Slab<CellNode>>,
}

impl CellArena {
    pub(crate) fn insert(&self) -> CellId {
        let mut slab = self.slab.write();
        let entry = slab.vacant_entry();
        let id = CellId::new(entry.key() as u32);
        entry.insert(CellNode::default());
        id
    }

    /// Remove a node, returning the subscribers it still had.
    pub(crate) fn remove(&self, id: CellId) -> Option<Vec<EffectId>> {
        let mut slab = self.slab.write();
        slab.try_remove(id.index())
            .map(|node| node.subscribers.into_inner().into_iter().collect())
    }

    /// Access a node. Returns `None` for stale ids.
    pub(crate) fn with<F, R>(&self, id: CellId, f: F) -> Option<R>
    where
        F: FnOnce(&CellNode) -> R,
    {
        let slab = self.slab.read();
        slab.get(id.index()).map(f)
    }

    pub(crate) fn add_subscriber(&self, id: CellId, effect: EffectId) {
        self.with(id, |node| {
            node.subscribers.write().insert(effect);
        });
    }

    pub(crate) fn remove_subscriber(&self, id: CellId, effect: EffectId) {
        self.with(id, |node| {
            node.subscribers.write().shift_remove(&effect);
        });
    }

    /// Copy of the subscriber list, so callers can run effects (which
    /// resubscribe) without holding any arena lock.
    pub(crate) fn subscribers(&self, id: CellId) -> Vec<EffectId> {
        self.with(id, |node| node.subscribers.read().iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn subscriber_count(&self, id: CellId) -> usize {
        self.with(id, |node| node.subscribers.read().len())
            .unwrap_or(0)
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_access_returns_none() {
        let arena = CellArena::default();
        let id = arena.insert();
        assert!(arena.remove(id).is_some());

        assert!(arena.with(id, |_| ()).is_none());
        assert!(arena.subscribers(id).is_empty());
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn subscribers_are_deduplicated_and_ordered() {
        let arena = CellArena::default();
        let id = arena.insert();
        arena.add_subscriber(id, EffectId::new(4));
        arena.add_subscriber(id, EffectId::new(1));
        arena.add_subscriber(id, EffectId::new(4));

        assert_eq!(
            arena.subscribers(id),
            vec![EffectId::new(4), EffectId::new(1)]
        );

        arena.remove_subscriber(id, EffectId::new(4));
        assert_eq!(arena.subscribers(id), vec![EffectId::new(1)]);
        assert_eq!(arena.remove(id), Some(vec![EffectId::new(1)]));
    }
}
