//! Attach reactive re-rendering to a host component's lifecycle.
//!
//! A [`RenderBridge`] owns one render function and one commit callback:
//!
//! 1. Construction renders once, synchronously and with tracking, so the host
//!    has an initial output without an empty first frame. The effect is only
//!    *prepared* at this point: it keeps its subscriptions but does not react.
//! 2. [`start`](RenderBridge::start), called from the host's mount hook, makes
//!    the effect live. A change that landed in between is replayed right away.
//! 3. Each re-run renders again and hands the output to `commit`, unless it is
//!    the same value ([`Identity`]) as the current output.
//! 4. [`stop`](RenderBridge::stop), called from the unmount hook, stops the
//!    effect. Starting again re-mounts with a fresh effect.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::effect::{Effect, EffectOptions};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::runtime::{Runtime, WeakRuntime};
use crate::value::Value;

type Render<T> = Box<dyn FnMut() -> Result<T> + Send>;
type Commit<T> = Box<dyn FnMut(T) + Send>;

/// Lifecycle position of a [`RenderBridge`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Rendered once; not reacting to changes yet.
    Prepared,
    /// Mounted: changes re-render and commit.
    Live,
    /// Stopped. [`RenderBridge::start`] re-mounts.
    Unmounted,
}

struct BridgeState<T> {
    render: Mutex<Render<T>>,
    commit: Mutex<Commit<T>>,
    current: RwLock<Option<T>>,
    /// False until construction finished; the first pass never commits.
    primed: AtomicBool,
    first_error: Mutex<Option<Error>>,
    runtime: WeakRuntime,
}

impl<T: Clone + Identity> BridgeState<T> {
    fn render_pass(&self) {
        let rendered = {
            let mut render = self.render.lock();
            render()
        };

        let primed = self.primed.load(Ordering::Acquire);
        match rendered {
            Ok(next) if !primed => *self.current.write() = Some(next),
            Err(error) if !primed => *self.first_error.lock() = Some(error),
            Ok(next) => self.commit_if_changed(next),
            Err(error) => {
                // The previous output stays on screen.
                match self.runtime.upgrade() {
                    Some(runtime) => runtime.report(error),
                    None => tracing::error!(%error, "render failed after its runtime was dropped"),
                }
            }
        }
    }

    fn commit_if_changed(&self, next: T) {
        {
            let mut current = self.current.write();
            if current.as_ref().is_some_and(|output| output.is_same(&next)) {
                cov_mark::hit!(bridge_skips_identical_output);
                return;
            }
            *current = Some(next.clone());
        }
        let mut commit = self.commit.lock();
        commit(next);
    }
}

/// Reactive render function bound to a host component.
///
/// # Example
/// ```ignore
/// let rt = Runtime::new();
/// let count = rt.cell(0);
///
/// let mut bridge = RenderBridge::new(
///     &rt,
///     EffectOptions::new().sync(true),
///     {
///         let count = count.clone();
///         move || Ok(format!("clicked {} times", count.get()))
///     },
///     move |text| host.set_label(text),
/// )?;
/// host.set_label(bridge.output()); // initial frame
///
/// bridge.start(); // componentDidMount
/// count.set(1);   // commits "clicked 1 times"
/// bridge.stop();  // componentWillUnmount
/// ```
pub struct RenderBridge<T> {
    runtime: Runtime,
    options: EffectOptions,
    state: Arc<BridgeState<T>>,
    effect: Option<Effect>,
    phase: Phase,
}

impl<T> fmt::Debug for RenderBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBridge")
            .field("phase", &self.phase)
            .field("effect", &self.effect.as_ref().map(Effect::id))
            .field("options", &self.options)
            .finish()
    }
}

impl<T> RenderBridge<T>
where
    T: Clone + Identity + Send + Sync + 'static,
{
    /// Render once and prepare the effect.
    ///
    /// An error returned by the first render is returned here and nothing
    /// stays subscribed. A panic in the first render propagates.
    pub fn new<R, C>(
        runtime: &Runtime,
        options: EffectOptions,
        render: R,
        commit: C,
    ) -> Result<Self>
    where
        R: FnMut() -> Result<T> + Send + 'static,
        C: FnMut(T) + Send + 'static,
    {
        let state = Arc::new(BridgeState {
            render: Mutex::new(Box::new(render)),
            commit: Mutex::new(Box::new(commit)),
            current: RwLock::new(None),
            primed: AtomicBool::new(false),
            first_error: Mutex::new(None),
            runtime: runtime.downgrade(),
        });

        let effect = runtime.prepare_effect(options.clone(), Self::job(&state));
        let first_error = state.first_error.lock().take();
        if let Some(error) = first_error {
            drop(effect);
            return Err(error);
        }
        state.primed.store(true, Ordering::Release);
        tracing::trace!(effect = ?effect.id(), "render bridge prepared");

        Ok(Self {
            runtime: runtime.clone(),
            options,
            state,
            effect: Some(effect),
            phase: Phase::Prepared,
        })
    }

    /// Bridge that displays a [`Value`] as-is (the "unref" binding).
    pub fn from_value<C>(
        runtime: &Runtime,
        options: EffectOptions,
        value: Value<T>,
        commit: C,
    ) -> Result<Self>
    where
        C: FnMut(T) + Send + 'static,
    {
        Self::new(runtime, options, move || Ok(value.get()), commit)
    }

    fn job(state: &Arc<BridgeState<T>>) -> impl FnMut() + Send + 'static {
        let state = state.clone();
        move || state.render_pass()
    }

    /// Mount: start reacting to changes. Idempotent while live.
    ///
    /// After [`stop`](Self::stop) this re-mounts with a fresh effect, which
    /// renders again and commits if the output changed in the meantime.
    pub fn start(&mut self) {
        match self.phase {
            Phase::Live => {}
            Phase::Prepared => {
                if let Some(effect) = &self.effect {
                    effect.start();
                }
                self.phase = Phase::Live;
            }
            Phase::Unmounted => {
                cov_mark::hit!(bridge_remounted);
                let effect = self
                    .runtime
                    .effect_with(self.options.clone(), Self::job(&self.state));
                self.effect = Some(effect);
                self.phase = Phase::Live;
            }
        }
    }

    /// Unmount: stop the effect. Idempotent.
    pub fn stop(&mut self) {
        if let Some(effect) = self.effect.take() {
            effect.stop();
            tracing::trace!(effect = ?effect.id(), "render bridge stopped");
        }
        self.phase = Phase::Unmounted;
    }

    /// The output currently on display.
    pub fn output(&self) -> T {
        self.state
            .current
            .read()
            .clone()
            .expect("render bridge holds an output once constructed")
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether changes currently re-render.
    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live && self.effect.as_ref().is_some_and(Effect::is_live)
    }

    /// Number of cells the last render read.
    pub fn dependency_count(&self) -> usize {
        self.effect.as_ref().map_or(0, Effect::dependency_count)
    }
}
