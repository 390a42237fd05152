// Effect arena - storage for tracked effects and computed nodes
//
// An EffectNode holds:
// - the job, stored directly in the arena (taken out while it runs)
// - sources: the cells read during the last run
// - a flag byte (dirty / stopped / running / live / queued)
// - the scheduling policy and observability hooks it was created with
// - for computeds, the output cell that dependents subscribe to
//
// The job is taken out of the slot while it runs so that the arena lock is
// never held across user code: jobs create cells and effects, which need the
// write lock. A missing job therefore also means "currently running".

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use slab::Slab;

use super::CellId;
use crate::effect::{Hooks, Schedule};
use crate::hash::OrderedSet;

pub(crate) type Job = Box<dyn FnMut() + Send>;

/// Index of an effect node in its runtime's arena.
///
/// Stopping an effect frees its slot, after which the id may be reused.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct EffectId(u32);

impl EffectId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) const DIRTY: u8 = 1 << 0;
pub(crate) const STOPPED: u8 = 1 << 1;
pub(crate) const RUNNING: u8 = 1 << 2;
pub(crate) const LIVE: u8 = 1 << 3;
/// Set while the node's id sits in the scheduler queue. A flush only runs ids
/// that still carry it, so a slot freed and reused mid-flush is skipped.
pub(crate) const QUEUED: u8 = 1 << 4;

pub(crate) struct EffectNode {
    pub(crate) schedule: Schedule,
    pub(crate) allow_recurse: bool,
    pub(crate) hooks: Hooks,
    /// Output node for computeds; `None` for plain effects.
    pub(crate) output: Option<CellId>,
    flags: AtomicU8,
    job: Mutex<Option<Job>>,
    sources: RwLock<OrderedSet<CellId>>,
}

impl EffectNode {
    pub(crate) fn new(
        job: Job,
        schedule: Schedule,
        allow_recurse: bool,
        hooks: Hooks,
        output: Option<CellId>,
        flags: u8,
    ) -> Self {
        Self {
            schedule,
            allow_recurse,
            hooks,
            output,
            flags: AtomicU8::new(flags),
            job: Mutex::new(Some(job)),
            sources: RwLock::new(OrderedSet::default()),
        }
    }

    #[inline]
    pub(crate) fn has(&self, flag: u8) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    /// Set `flag`, returning whether it was already set.
    #[inline]
    pub(crate) fn set(&self, flag: u8) -> bool {
        self.flags.fetch_or(flag, Ordering::AcqRel) & flag != 0
    }

    /// Clear `flag`, returning whether it was set.
    #[inline]
    pub(crate) fn clear(&self, flag: u8) -> bool {
        self.flags.fetch_and(!flag, Ordering::AcqRel) & flag != 0
    }

    pub(crate) fn take_job(&self) -> Option<Job> {
        self.job.lock().take()
    }

    pub(crate) fn restore_job(&self, job: Job) {
        *self.job.lock() = Some(job);
    }

    /// Record a read. Returns true the first time `cell` is seen this run.
    pub(crate) fn add_source(&self, cell: CellId) -> bool {
        self.sources.write().insert(cell)
    }

    pub(crate) fn remove_source(&self, cell: CellId) {
        self.sources.write().shift_remove(&cell);
    }

    pub(crate) fn take_sources(&self) -> OrderedSet<CellId> {
        std::mem::take(&mut *self.sources.write())
    }

    pub(crate) fn source_count(&self) -> usize {
        self.sources.read().len()
    }
}

#[derive(Default)]
pub(crate) struct EffectArena {
    slab: RwLock<Slab<EffectNode>>,
}

impl EffectArena {
    pub(crate) fn insert(&self, node: EffectNode) -> EffectId {
        let mut slab = self.slab.write();
        let entry = slab.vacant_entry();
        let id = EffectId::new(entry.key() as u32);
        entry.insert(node);
        id
    }

    pub(crate) fn remove(&self, id: EffectId) -> Option<EffectNode> {
        self.slab.write().try_remove(id.index())
    }

    /// Access a node. Returns `None` for stale ids.
    pub(crate) fn with<F, R>(&self, id: EffectId, f: F) -> Option<R>
    where
        F: FnOnce(&EffectNode) -> R,
    {
        let slab = self.slab.read();
        slab.get(id.index()).map(f)
    }

    pub(crate) fn has(&self, id: EffectId, flag: u8) -> bool {
        self.with(id, |node| node.has(flag)).unwrap_or(false)
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.read().len()
    }
}
