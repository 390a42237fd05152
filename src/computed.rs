use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::arena::CellId;
use crate::effect::{Effect, EffectOptions};
use crate::runtime::Runtime;

/// Lazily evaluated, memoized derived value.
///
/// # How it works
/// Internally, a Computed is composed of:
/// - A manual-mode Effect that tracks the getter's reads
/// - An output node that readers of the computed subscribe to
/// - A cached value, filled on first read
///
/// Nothing runs on construction. The first read runs the getter and caches the
/// result. A write to any dependency only marks the computed dirty and notifies
/// its own readers; the getter runs again on the next read, not before. Reads
/// while clean never call the getter.
///
/// # Example
/// ```ignore
/// let rt = Runtime::new();
/// let count = rt.cell(2);
/// let double = rt.computed({
///     let count = count.clone();
///     move || count.get() * 2
/// });
///
/// assert_eq!(double.get(), 4); // getter runs
/// assert_eq!(double.get(), 4); // cached
///
/// count.set(5);                // marks dirty, nothing recomputed yet
/// assert_eq!(double.get(), 10);
/// ```
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

struct ComputedInner<T> {
    /// Owns the output node; dropping it releases both.
    effect: Effect,
    output: CellId,
    value: Arc<RwLock<Option<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("effect", &self.inner.effect.id())
            .field("dirty", &self.is_dirty())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Computed<T> {
    /// Create a computed in `runtime`. Same as [`Runtime::computed`].
    pub fn new<F>(runtime: &Runtime, mut getter: F) -> Self
    where
        F: FnMut() -> T + Send + 'static,
    {
        let value: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));
        let output = runtime.insert_cell();

        let value_for_job = value.clone();
        let job = Box::new(move || {
            let next = getter();
            *value_for_job.write() = Some(next);
        });
        let effect = Effect::deferred(runtime, EffectOptions::new().manual(), job, Some(output));

        Self {
            inner: Arc::new(ComputedInner {
                effect,
                output,
                value,
            }),
        }
    }
}

impl<T> Computed<T> {
    /// Tracked read, cloning the cached value. Recomputes first if dirty.
    ///
    /// # Panics
    /// Same as [`with`](Self::with).
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Tracked read by reference. Recomputes first if dirty.
    ///
    /// Panics raised by the getter propagate; the computed stays dirty and the
    /// next read retries.
    ///
    /// # Panics
    /// If the getter reads this same computed, directly or through other
    /// computeds, while its first evaluation is running. There is no value to
    /// return yet. On later evaluations such a cycle reads the previous value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let inner = &self.inner;
        if inner.effect.is_dirty() {
            inner.effect.run();
        }
        inner.effect.runtime().track(inner.output);

        let value = inner.value.read();
        f(value
            .as_ref()
            .expect("computed read itself during its first evaluation (dependency cycle)"))
    }

    /// Whether the next read will run the getter.
    pub fn is_dirty(&self) -> bool {
        self.inner.effect.is_dirty()
    }

    /// Force the next read to recompute and notify readers, as if a
    /// dependency had changed.
    pub fn invalidate(&self) {
        let effect = &self.inner.effect;
        if !effect.is_stopped() {
            effect.runtime().dispatch(effect.id());
        }
    }

    /// Number of cells (or computeds) the getter read during its last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.effect.dependency_count()
    }

    /// Number of effects currently reading this computed.
    pub fn subscriber_count(&self) -> usize {
        self.inner.effect.runtime().subscriber_count(self.inner.output)
    }

    /// Whether both handles share the same cache.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
