use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arena::{CellId, DIRTY, EffectId, EffectNode, Job, LIVE, STOPPED};
use crate::runtime::Runtime;

/// How an effect reacts when one of its dependencies is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Schedule {
    /// Re-run inline, before the write returns. Never coalesced.
    Sync,
    /// Enqueue on the scheduler; multiple writes before a flush run it once.
    #[default]
    Batched,
    /// Only mark the effect dirty. It re-runs when asked to
    /// ([`Effect::run_if_dirty`]); computeds use this policy.
    Manual,
}

/// Hook fired with the effect and the cell involved.
pub type CellHook = Arc<dyn Fn(EffectId, CellId) + Send + Sync>;
/// Hook fired with the effect being stopped.
pub type StopHook = Arc<dyn Fn(EffectId) + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_track: Option<CellHook>,
    pub(crate) on_trigger: Option<CellHook>,
    pub(crate) on_stop: Option<StopHook>,
}

/// Per-effect configuration.
///
/// The hooks are purely observational: they never change when or whether the
/// effect runs.
///
/// ```ignore
/// let options = EffectOptions::new()
///     .sync(true)
///     .on_trigger(|effect, cell| tracing::debug!(?effect, ?cell, "triggered"));
/// ```
#[derive(Clone, Default)]
pub struct EffectOptions {
    pub(crate) schedule: Schedule,
    pub(crate) allow_recurse: bool,
    pub(crate) hooks: Hooks,
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("schedule", &self.schedule)
            .field("allow_recurse", &self.allow_recurse)
            .field("on_track", &self.hooks.on_track.is_some())
            .field("on_trigger", &self.hooks.on_trigger.is_some())
            .field("on_stop", &self.hooks.on_stop.is_some())
            .finish()
    }
}

impl EffectOptions {
    /// Batched scheduling, no recursion, no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` re-runs inline on every write; `false` batches through the scheduler.
    pub fn sync(mut self, sync: bool) -> Self {
        self.schedule = if sync { Schedule::Sync } else { Schedule::Batched };
        self
    }

    /// Writes only mark the effect dirty.
    pub fn manual(mut self) -> Self {
        self.schedule = Schedule::Manual;
        self
    }

    /// Allow the effect to be re-triggered by its own writes.
    pub fn allow_recurse(mut self, allow: bool) -> Self {
        self.allow_recurse = allow;
        self
    }

    /// Called whenever the effect subscribes to a cell.
    pub fn on_track<F>(mut self, hook: F) -> Self
    where
        F: Fn(EffectId, CellId) + Send + Sync + 'static,
    {
        self.hooks.on_track = Some(Arc::new(hook));
        self
    }

    /// Called whenever a write to a dependency reaches the effect.
    pub fn on_trigger<F>(mut self, hook: F) -> Self
    where
        F: Fn(EffectId, CellId) + Send + Sync + 'static,
    {
        self.hooks.on_trigger = Some(Arc::new(hook));
        self
    }

    /// Called once when the effect is stopped.
    pub fn on_stop<F>(mut self, hook: F) -> Self
    where
        F: Fn(EffectId) + Send + Sync + 'static,
    {
        self.hooks.on_stop = Some(Arc::new(hook));
        self
    }

    /// The configured scheduling policy.
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }
}

/// Side-effectful job that re-runs when the cells it read change.
///
/// # How it works
/// 1. The job runs once on creation; every cell it reads is recorded.
/// 2. A write to a recorded cell re-runs the job inline ([`Schedule::Sync`]),
///    enqueues it ([`Schedule::Batched`]) or marks it dirty ([`Schedule::Manual`]).
/// 3. Before each re-run the previous subscriptions are dropped, so cells the
///    job stops reading stop triggering it.
///
/// Dropping the handle stops the effect.
///
/// # Example
/// ```ignore
/// let rt = Runtime::new();
/// let count = rt.cell(0);
///
/// let effect = rt.effect({
///     let count = count.clone();
///     move || println!("count = {}", count.get())
/// });
///
/// count.set(1);
/// count.set(2);
/// rt.flush(); // prints "count = 2" once
/// ```
pub struct Effect {
    id: EffectId,
    runtime: Runtime,
    stopped: AtomicBool,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Effect {
    /// Create an effect and run it once. A panic in this first run
    /// propagates to the caller and leaves nothing subscribed.
    pub fn new<F>(runtime: &Runtime, options: EffectOptions, job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(runtime, options, Box::new(job), LIVE, None, true)
    }

    /// Two-phase construction: run the job once now, with tracking, but keep
    /// the effect dormant until [`start`](Self::start).
    ///
    /// A dormant effect keeps its subscriptions. Writes it sees only mark it
    /// dirty; `start` then dispatches that pending change per the schedule.
    pub fn prepare<F>(runtime: &Runtime, options: EffectOptions, job: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::spawn(runtime, options, Box::new(job), 0, None, true)
    }

    /// Create a live, dirty effect that has not run yet, optionally owning an
    /// output node. Used by computeds.
    pub(crate) fn deferred(
        runtime: &Runtime,
        options: EffectOptions,
        job: Job,
        output: Option<CellId>,
    ) -> Self {
        Self::spawn(runtime, options, job, LIVE | DIRTY, output, false)
    }

    fn spawn(
        runtime: &Runtime,
        options: EffectOptions,
        job: Job,
        flags: u8,
        output: Option<CellId>,
        run_now: bool,
    ) -> Self {
        let EffectOptions {
            schedule,
            allow_recurse,
            hooks,
        } = options;
        let node = EffectNode::new(job, schedule, allow_recurse, hooks, output, flags);
        let effect = Self {
            id: runtime.insert_effect(node),
            runtime: runtime.clone(),
            stopped: AtomicBool::new(false),
        };

        if run_now {
            let first = panic::catch_unwind(AssertUnwindSafe(|| effect.runtime.run_effect(effect.id)));
            if let Err(payload) = first {
                effect.stop();
                panic::resume_unwind(payload);
            }
        }
        effect
    }

    /// Arena id of this effect.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Make a prepared effect live. Idempotent; no-op once stopped.
    pub fn start(&self) {
        if !self.is_stopped() {
            self.runtime.start_effect(self.id);
        }
    }

    /// Unsubscribe from every cell and never run again. Idempotent.
    ///
    /// Calling this from inside the job does not abort the current run.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.runtime.stop_effect(self.id);
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether the effect reacts to writes (started and not stopped).
    pub fn is_live(&self) -> bool {
        !self.is_stopped()
            && self.runtime.effect_has(self.id, LIVE)
            && !self.runtime.effect_has(self.id, STOPPED)
    }

    /// Whether a dependency changed since the last run.
    pub fn is_dirty(&self) -> bool {
        !self.is_stopped() && self.runtime.effect_has(self.id, DIRTY)
    }

    /// Re-run the job now. Panics propagate to the caller. Returns false if
    /// the effect is stopped or is already running.
    pub fn run(&self) -> bool {
        !self.is_stopped() && self.runtime.run_effect(self.id)
    }

    /// Re-run the job only if a dependency changed since the last run.
    pub fn run_if_dirty(&self) -> bool {
        self.is_dirty() && self.run()
    }

    /// Number of cells read during the last run.
    pub fn dependency_count(&self) -> usize {
        if self.is_stopped() {
            0
        } else {
            self.runtime.source_count(self.id)
        }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}

impl Drop for Effect {
    fn drop(&mut self) {
        self.stop();
    }
}
