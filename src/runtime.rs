//! The reactive root.
//!
//! A [`Runtime`] owns everything one reactive graph needs: the cell and effect
//! arenas, the current observer, the batch depth and the [`Scheduler`]. Handles
//! created from it (cells, effects, computeds, bridges) keep it alive.
//! Independent runtimes never share state, so tests can build one each.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::arena::{
    CellArena, CellId, DIRTY, EffectArena, EffectId, EffectNode, Job, LIVE, QUEUED, RUNNING,
    STOPPED,
};
use crate::effect::{Effect, EffectOptions, Schedule};
use crate::error::Error;
use crate::scheduler::{DEFAULT_RECURSION_LIMIT, FlushHook, Scheduler};
use crate::{Computed, ReactiveCell};

/// Hook receiving every failure the runtime isolates.
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Handle to a reactive root. Cloning is cheap and yields the same root.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) cells: CellArena,
    pub(crate) effects: EffectArena,
    pub(crate) scheduler: Scheduler,
    observer: Mutex<Option<EffectId>>,
    batch_depth: AtomicUsize,
    on_error: Option<ErrorHook>,
}

#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

/// Builder for a [`Runtime`].
///
/// ```ignore
/// let runtime = Runtime::builder()
///     .recursion_limit(50)
///     .on_flush_requested(|| host.queue_microtask())
///     .on_error(|err| eprintln!("{err}"))
///     .build();
/// ```
#[derive(Default)]
pub struct RuntimeBuilder {
    recursion_limit: Option<usize>,
    on_flush_requested: Option<FlushHook>,
    on_error: Option<ErrorHook>,
}

impl RuntimeBuilder {
    /// How many times a single job may run within one flush.
    ///
    /// Default: 100
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Called when the first batched job of a window is enqueued. The host
    /// should arrange for [`Runtime::flush`] to run once the current call
    /// stack has unwound.
    pub fn on_flush_requested<F>(mut self, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_flush_requested = Some(Arc::new(hook));
        self
    }

    /// Called, after logging, for every failure that is isolated instead of
    /// propagated (failing re-runs, recursion limit hits).
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Build the runtime.
    pub fn build(self) -> Runtime {
        let limit = self.recursion_limit.unwrap_or(DEFAULT_RECURSION_LIMIT);
        Runtime {
            inner: Arc::new(RuntimeInner {
                cells: CellArena::default(),
                effects: EffectArena::default(),
                scheduler: Scheduler::new(limit, self.on_flush_requested),
                observer: Mutex::new(None),
                batch_depth: AtomicUsize::new(0),
                on_error: self.on_error,
            }),
        }
    }
}

/// Restores the previous observer when dropped, even if the job panics.
pub(crate) struct ObserverGuard<'a> {
    runtime: &'a Runtime,
    previous: Option<EffectId>,
}

impl<'a> ObserverGuard<'a> {
    pub(crate) fn new(runtime: &'a Runtime, observer: Option<EffectId>) -> Self {
        let previous = std::mem::replace(&mut *runtime.inner.observer.lock(), observer);
        Self { runtime, previous }
    }
}

impl Drop for ObserverGuard<'_> {
    fn drop(&mut self) {
        *self.runtime.inner.observer.lock() = self.previous;
    }
}

/// Puts a running job back into its slot when the run ends.
///
/// If the effect was stopped mid-run the slot is released here instead, since
/// `stop` cannot free a slot whose job is still executing.
struct JobGuard<'a> {
    runtime: &'a Runtime,
    id: EffectId,
    job: Option<Job>,
}

impl JobGuard<'_> {
    fn run(&mut self) {
        if let Some(job) = self.job.as_mut() {
            job();
        }
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        let effects = &self.runtime.inner.effects;
        let stopped = effects
            .with(self.id, |node| {
                node.clear(RUNNING);
                if std::thread::panicking() {
                    node.set(DIRTY);
                }
                node.has(STOPPED)
            })
            .unwrap_or(true);

        if stopped {
            cov_mark::hit!(stopped_mid_run_released);
            self.runtime.release_effect(self.id);
        } else if let Some(job) = self.job.take() {
            effects.with(self.id, |node| node.restore_job(job));
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cells", &self.inner.cells.len())
            .field("effects", &self.inner.effects.len())
            .field("pending_jobs", &self.inner.scheduler.len())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime with default configuration.
    pub fn new() -> Self {
        RuntimeBuilder::default().build()
    }

    /// Configure a runtime before creating it.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Create a reactive cell holding `value`.
    pub fn cell<T>(&self, value: T) -> ReactiveCell<T> {
        ReactiveCell::new(self, value)
    }

    /// Create a batched effect. The job runs once immediately.
    pub fn effect<F>(&self, job: F) -> Effect
    where
        F: FnMut() + Send + 'static,
    {
        Effect::new(self, EffectOptions::default(), job)
    }

    /// Create an effect with explicit options. The job runs once immediately.
    pub fn effect_with<F>(&self, options: EffectOptions, job: F) -> Effect
    where
        F: FnMut() + Send + 'static,
    {
        Effect::new(self, options, job)
    }

    /// Run the job once now, but leave the effect dormant until
    /// [`Effect::start`] is called. See [`Effect::prepare`].
    pub fn prepare_effect<F>(&self, options: EffectOptions, job: F) -> Effect
    where
        F: FnMut() + Send + 'static,
    {
        Effect::prepare(self, options, job)
    }

    /// Create a lazily evaluated derived value.
    pub fn computed<T, F>(&self, getter: F) -> Computed<T>
    where
        T: Send + Sync + 'static,
        F: FnMut() -> T + Send + 'static,
    {
        Computed::new(self, getter)
    }

    /// Run `f` with dependency tracking suspended. Reads inside `f` never
    /// subscribe the surrounding effect.
    pub fn untracked<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = ObserverGuard::new(self, None);
        f()
    }

    /// Whether an effect is currently recording reads.
    pub fn is_tracking(&self) -> bool {
        self.observer().is_some()
    }

    /// Whether a flush has been requested and has not run yet.
    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.is_scheduled()
    }

    /// Number of batched jobs waiting for the next flush.
    pub fn pending_jobs(&self) -> usize {
        self.inner.scheduler.len()
    }

    /// Run every queued batched job, including jobs queued while flushing.
    ///
    /// Each job's failure is contained and reported; it does not stop the
    /// remaining jobs. Returns the number of jobs executed.
    pub fn flush(&self) -> usize {
        let executed = self.inner.scheduler.flush(
            |id| {
                let runnable = self
                    .inner
                    .effects
                    .with(id, |node| {
                        node.clear(QUEUED) && node.has(DIRTY) && !node.has(STOPPED)
                    })
                    .unwrap_or(false);
                if !runnable {
                    cov_mark::hit!(flush_skipped_unqueued);
                }
                runnable && self.rerun_isolated(id)
            },
            |id, limit| self.report(Error::RecursionLimit { effect: id, limit }),
        );
        if executed > 0 {
            tracing::debug!(executed, "flushed batched effects");
        }
        executed
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Arc::downgrade(&self.inner))
    }

    pub(crate) fn observer(&self) -> Option<EffectId> {
        *self.inner.observer.lock()
    }

    pub(crate) fn enter_batch(&self) {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when the outermost batch was exited.
    pub(crate) fn exit_batch(&self) -> bool {
        self.inner.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.inner.batch_depth.load(Ordering::Acquire) > 0
    }

    /// Log an isolated failure and hand it to the error hook.
    pub(crate) fn report(&self, error: Error) {
        tracing::error!(%error, "reactive job failed");
        if let Some(hook) = &self.inner.on_error {
            hook(&error);
        }
    }

    // =========================================================================
    // Graph bookkeeping
    // =========================================================================

    pub(crate) fn insert_effect(&self, node: EffectNode) -> EffectId {
        let id = self.inner.effects.insert(node);
        tracing::trace!(?id, "effect created");
        id
    }

    /// Record a read of `cell` by the current observer, if any.
    pub(crate) fn track(&self, cell: CellId) {
        let Some(observer) = self.observer() else {
            return;
        };
        let recorded = self.inner.effects.with(observer, |node| {
            if node.has(STOPPED) || !node.add_source(cell) {
                return None;
            }
            Some(node.hooks.on_track.clone())
        });
        if let Some(Some(on_track)) = recorded {
            self.inner.cells.add_subscriber(cell, observer);
            if let Some(hook) = on_track {
                hook(observer, cell);
            }
        }
    }

    /// Notify every subscriber of `cell` that it was written.
    ///
    /// Runs in two passes. The first marks every affected node dirty, following
    /// computed outputs transitively, and collects the sync effects to re-run.
    /// The second runs those effects, so none of them can observe a computed
    /// that has not yet been marked dirty by this write.
    pub(crate) fn trigger(&self, cell: CellId) {
        let mut sync = Vec::new();
        self.mark_subscribers(cell, &mut sync);
        self.run_sync(sync);
    }

    fn mark_subscribers(&self, cell: CellId, sync: &mut Vec<EffectId>) {
        let current = self.observer();
        for effect in self.inner.cells.subscribers(cell) {
            let live = self.inner.effects.with(effect, |node| {
                (!node.has(STOPPED)).then(|| (node.allow_recurse, node.hooks.on_trigger.clone()))
            });
            let Some((allow_recurse, on_trigger)) = live.flatten() else {
                continue;
            };

            if Some(effect) == current && !allow_recurse {
                cov_mark::hit!(self_trigger_ignored);
                tracing::trace!(?effect, ?cell, "effect wrote a cell it reads; not re-triggered");
                continue;
            }

            if let Some(hook) = on_trigger {
                hook(effect, cell);
            }
            self.mark(effect, sync);
        }
    }

    /// React to a dependency change according to the effect's policy.
    pub(crate) fn dispatch(&self, id: EffectId) {
        let mut sync = Vec::new();
        self.mark(id, &mut sync);
        self.run_sync(sync);
    }

    /// Mark an effect dirty. Batched effects are queued, sync effects are
    /// collected into `sync`, and computeds pass the change on to their readers.
    fn mark(&self, id: EffectId, sync: &mut Vec<EffectId>) {
        let Some((schedule, was_dirty, live, output)) = self.inner.effects.with(id, |node| {
            (node.schedule, node.set(DIRTY), node.has(LIVE), node.output)
        }) else {
            return;
        };

        if !live {
            cov_mark::hit!(dormant_effect_marked_dirty);
            return;
        }

        match schedule {
            Schedule::Sync => {
                if !sync.contains(&id) {
                    sync.push(id);
                }
            }
            Schedule::Batched => {
                self.inner.effects.with(id, |node| node.set(QUEUED));
                self.inner.scheduler.enqueue(id);
            }
            Schedule::Manual => {
                if !was_dirty {
                    if let Some(output) = output {
                        self.mark_subscribers(output, sync);
                    }
                }
            }
        }
    }

    /// Re-run the collected sync effects that are still dirty.
    ///
    /// An effect already re-run by an earlier one in the list (through a
    /// nested write) is clean by now and is skipped. A running effect is not
    /// re-entered: it picks the change up when its current run returns
    /// (allow_recurse), or keeps its dirty flag.
    ///
    /// Afterwards, outside a batch, the host is asked to flush whatever
    /// batched jobs the write queued.
    fn run_sync(&self, sync: Vec<EffectId>) {
        for id in sync {
            let pending = self
                .inner
                .effects
                .with(id, |node| {
                    node.schedule == Schedule::Sync && node.has(DIRTY) && !node.has(STOPPED)
                })
                .unwrap_or(false);
            if pending {
                self.rerun_isolated(id);
            } else {
                cov_mark::hit!(sync_rerun_deduplicated);
            }
        }

        if !self.is_batching() {
            self.inner.scheduler.request_flush();
        }
    }

    /// Re-run an effect, containing panics. Returns whether the job ran.
    pub(crate) fn rerun_isolated(&self, id: EffectId) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_effect(id))) {
            Ok(ran) => ran,
            Err(payload) => {
                self.report(Error::panicked(id, payload.as_ref()));
                true
            }
        }
    }

    /// Run an effect's job with tracking. Panics propagate to the caller.
    ///
    /// Old subscriptions are dropped before the job runs, so the dependency
    /// set afterwards is exactly what this run read. Returns false if the
    /// effect is stopped or already running.
    pub(crate) fn run_effect(&self, id: EffectId) -> bool {
        let mut ran = false;
        loop {
            let claimed = self.inner.effects.with(id, |node| {
                if node.has(STOPPED) {
                    return None;
                }
                let job = node.take_job()?;
                node.set(RUNNING);
                node.clear(DIRTY);
                node.clear(QUEUED);
                Some((job, node.allow_recurse, node.schedule == Schedule::Sync))
            });
            let Some((job, allow_recurse, sync)) = claimed.flatten() else {
                if ran {
                    break;
                }
                cov_mark::hit!(run_skipped_reentrant_or_stopped);
                return false;
            };

            self.inner.scheduler.remove(id);
            self.clear_sources(id);

            {
                let _observer = ObserverGuard::new(self, Some(id));
                let mut guard = JobGuard {
                    runtime: self,
                    id,
                    job: Some(job),
                };
                guard.run();
            }
            ran = true;

            // A sync effect that triggered itself during the run goes again.
            let again = allow_recurse
                && sync
                && self
                    .inner
                    .effects
                    .with(id, |node| node.has(DIRTY) && !node.has(STOPPED))
                    .unwrap_or(false);
            if !again {
                break;
            }
            cov_mark::hit!(sync_effect_recursed);
        }
        tracing::trace!(?id, "effect ran");
        ran
    }

    fn clear_sources(&self, id: EffectId) {
        let sources = self
            .inner
            .effects
            .with(id, EffectNode::take_sources)
            .unwrap_or_default();
        for cell in sources {
            self.inner.cells.remove_subscriber(cell, id);
        }
    }

    /// Make a dormant effect live. Changes seen while dormant are dispatched now.
    pub(crate) fn start_effect(&self, id: EffectId) {
        let dirty = self
            .inner
            .effects
            .with(id, |node| {
                if node.has(STOPPED) || node.set(LIVE) {
                    return false;
                }
                node.clear(DIRTY)
            })
            .unwrap_or(false);
        if dirty {
            cov_mark::hit!(dormant_change_replayed);
            self.dispatch(id);
        }
    }

    /// Permanently stop an effect. Idempotent.
    pub(crate) fn stop_effect(&self, id: EffectId) {
        let first_stop = self.inner.effects.with(id, |node| {
            (!node.set(STOPPED)).then(|| (node.has(RUNNING), node.hooks.on_stop.clone()))
        });
        let Some((running, on_stop)) = first_stop.flatten() else {
            return;
        };

        self.inner.scheduler.remove(id);
        self.clear_sources(id);
        if !running {
            self.release_effect(id);
        }
        tracing::trace!(?id, "effect stopped");
        if let Some(hook) = on_stop {
            hook(id);
        }
    }

    /// Free an effect's slot and, for computeds, its output node.
    fn release_effect(&self, id: EffectId) {
        if let Some(node) = self.inner.effects.remove(id) {
            if let Some(output) = node.output {
                self.release_cell(output);
            }
            // The job (and whatever it captured) drops here, outside any lock.
            drop(node);
        }
    }

    pub(crate) fn insert_cell(&self) -> CellId {
        self.inner.cells.insert()
    }

    /// Remove a cell node and unlink it from every effect that read it.
    pub(crate) fn release_cell(&self, cell: CellId) {
        for effect in self.inner.cells.remove(cell).unwrap_or_default() {
            self.inner
                .effects
                .with(effect, |node| node.remove_source(cell));
        }
    }

    pub(crate) fn subscriber_count(&self, cell: CellId) -> usize {
        self.inner.cells.subscriber_count(cell)
    }

    pub(crate) fn source_count(&self, effect: EffectId) -> usize {
        self.inner
            .effects
            .with(effect, EffectNode::source_count)
            .unwrap_or(0)
    }

    pub(crate) fn effect_has(&self, effect: EffectId, flag: u8) -> bool {
        self.inner.effects.has(effect, flag)
    }
}
