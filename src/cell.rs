use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::arena::CellId;
use crate::runtime::Runtime;

/// Mutable slot that records reads and notifies readers on write.
///
/// Cloning yields another handle to the same slot. The node is removed from
/// the runtime when the last handle drops.
///
/// ```ignore
/// let rt = Runtime::new();
/// let name = rt.cell(String::from("ada"));
///
/// let _greeter = rt.effect({
///     let name = name.clone();
///     move || println!("hello {}", name.get())
/// });
///
/// name.set("grace".into());
/// rt.flush();
/// ```
pub struct ReactiveCell<T> {
    inner: Arc<CellInner<T>>,
}

struct CellInner<T> {
    id: CellId,
    runtime: Runtime,
    value: RwLock<T>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        self.runtime.release_cell(self.id);
    }
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> ReactiveCell<T> {
    /// Allocate a cell in `runtime`. Same as [`Runtime::cell`].
    pub fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                id: runtime.insert_cell(),
                runtime: runtime.clone(),
                value: RwLock::new(value),
            }),
        }
    }

    /// Arena id of this cell.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// The runtime this cell belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Tracked read, cloning the value.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Tracked read by reference. The closure must not write to this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.runtime.track(self.inner.id);
        self.with_untracked(f)
    }

    /// Read without subscribing the current effect.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.with_untracked(T::clone)
    }

    /// Borrow without subscribing the current effect.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Store `value` and notify every reader, even if the value is unchanged.
    pub fn set(&self, value: T) {
        let previous = self.replace(value);
        drop(previous);
    }

    /// Store `value` only if it differs from the current one. Returns whether
    /// readers were notified.
    pub fn set_if_changed(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        {
            let mut slot = self.inner.value.write();
            if *slot == value {
                return false;
            }
            *slot = value;
        }
        self.notify();
        true
    }

    /// Mutate in place, then notify.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.inner.value.write());
        self.notify();
        result
    }

    /// Store `value`, notify, and return the previous value.
    pub fn replace(&self, value: T) -> T {
        let previous = std::mem::replace(&mut *self.inner.value.write(), value);
        self.notify();
        previous
    }

    /// Notify readers without changing the value. Useful after interior
    /// mutation the cell cannot see.
    pub fn notify(&self) {
        self.inner.runtime.trigger(self.inner.id);
    }

    /// Number of effects that read this cell during their last run.
    pub fn subscriber_count(&self) -> usize {
        self.inner.runtime.subscriber_count(self.inner.id)
    }

    /// Whether both handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
