//! Batched job queue.
//!
//! Batched effects do not re-run when a dependency is written. They are
//! enqueued here instead, and run when the host reaches its flush point:
//!
//! 1. A write enqueues every batched subscriber (set semantics: an effect that
//!    is already queued is not queued again).
//! 2. The first enqueue of a window calls the flush-request hook, which is how
//!    a host event loop schedules the flush after the current call stack.
//! 3. [`Runtime::flush`](crate::Runtime::flush) drains the queue in insertion
//!    order. Jobs enqueued while draining are picked up by the same flush.
//!
//! A job that keeps re-enqueueing itself is dropped for the rest of the flush
//! once it exceeds the recursion limit, so a feedback loop cannot hang the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::arena::EffectId;
use crate::hash::{FastHashMap, OrderedSet};

/// Default number of times one job may run within a single flush.
pub const DEFAULT_RECURSION_LIMIT: usize = 100;

/// Hook invoked when a flush becomes necessary.
pub type FlushHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct Scheduler {
    queue: Mutex<OrderedSet<EffectId>>,
    flushing: AtomicBool,
    scheduled: AtomicBool,
    recursion_limit: usize,
    on_flush_requested: Option<FlushHook>,
}

/// Clears the flushing flag even if a job unwinds through the flush loop.
struct FlushingGuard<'a>(&'a AtomicBool);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub(crate) fn new(recursion_limit: usize, on_flush_requested: Option<FlushHook>) -> Self {
        Self {
            queue: Mutex::new(OrderedSet::default()),
            flushing: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            recursion_limit,
            on_flush_requested,
        }
    }

    /// Add a job to the pending set. Returns false if it was already queued.
    pub(crate) fn enqueue(&self, id: EffectId) -> bool {
        let inserted = self.queue.lock().insert(id);
        if !inserted {
            cov_mark::hit!(enqueue_coalesced);
        }
        inserted
    }

    pub(crate) fn remove(&self, id: EffectId) {
        self.queue.lock().shift_remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    /// Ask the host for a flush, once per window.
    ///
    /// Nothing is requested while a flush is running: that flush picks the
    /// new jobs up before it returns.
    pub(crate) fn request_flush(&self) {
        if self.flushing.load(Ordering::Acquire) || self.queue.lock().is_empty() {
            return;
        }
        if !self.scheduled.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &self.on_flush_requested {
                hook();
            }
        }
    }

    /// Drain the queue, calling `run` for each job in insertion order.
    ///
    /// `run` returns whether the job actually executed. `on_limit` is called
    /// once for each job that exceeds the recursion limit. Returns the number
    /// of executed jobs; a nested call made from inside `run` returns 0.
    pub(crate) fn flush<R, L>(&self, mut run: R, mut on_limit: L) -> usize
    where
        R: FnMut(EffectId) -> bool,
        L: FnMut(EffectId, usize),
    {
        if self.flushing.swap(true, Ordering::AcqRel) {
            cov_mark::hit!(nested_flush_ignored);
            return 0;
        }
        let _guard = FlushingGuard(&self.flushing);
        self.scheduled.store(false, Ordering::Release);

        let mut runs: FastHashMap<EffectId, usize> = FastHashMap::default();
        let mut batch = Vec::new();
        let mut executed = 0;

        loop {
            batch.extend(self.queue.lock().drain(..));
            if batch.is_empty() {
                break;
            }

            for id in batch.drain(..) {
                let count = runs.entry(id).or_insert(0);
                *count += 1;
                if *count > self.recursion_limit {
                    if *count == self.recursion_limit + 1 {
                        on_limit(id, self.recursion_limit);
                    }
                    continue;
                }
                if run(id) {
                    executed += 1;
                }
            }
        }

        executed
    }
}
