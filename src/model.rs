use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::{Computed, ReactiveCell};

type Getter<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Setter<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Named getter/setter pair over reactive state.
///
/// View-models are plain structs of accessors, so every field is known at
/// compile time and a name can never be bound twice:
///
/// ```ignore
/// struct TodoView {
///     label: Accessor<String>,
///     done: Accessor<bool>,
///     remaining: Accessor<usize>,
/// }
///
/// let view = TodoView {
///     label: Accessor::from_cell("label", label.clone()),
///     done: Accessor::from_cell("done", done.clone()),
///     remaining: Accessor::readonly("remaining", remaining.clone()),
/// };
///
/// view.done.set(true)?;
/// assert!(view.remaining.set(0).is_err());
/// ```
pub struct Accessor<T> {
    name: &'static str,
    get: Getter<T>,
    set: Option<Setter<T>>,
}

impl<T> Clone for Accessor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<T> fmt::Debug for Accessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accessor")
            .field("name", &self.name)
            .field("writable", &self.is_writable())
            .finish()
    }
}

impl<T> Accessor<T> {
    /// Read and write a cell.
    pub fn from_cell(name: &'static str, cell: ReactiveCell<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        let reader = cell.clone();
        Self {
            name,
            get: Arc::new(move || reader.get()),
            set: Some(Arc::new(move |value: T| cell.set(value))),
        }
    }

    /// Read a computed. [`set`](Self::set) fails with [`Error::ReadOnly`].
    pub fn readonly(name: &'static str, computed: Computed<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            name,
            get: Arc::new(move || computed.get()),
            set: None,
        }
    }

    /// Arbitrary getter and setter, such as a writable computed that maps a
    /// write back onto the cells it derives from.
    pub fn with_setter<G, S>(name: &'static str, get: G, set: S) -> Self
    where
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Self {
            name,
            get: Arc::new(get),
            set: Some(Arc::new(set)),
        }
    }

    /// Field name, used in error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether [`set`](Self::set) can succeed.
    pub fn is_writable(&self) -> bool {
        self.set.is_some()
    }

    /// Tracked read.
    pub fn get(&self) -> T {
        (self.get)()
    }

    /// Write through the setter.
    pub fn set(&self, value: T) -> Result<()> {
        match &self.set {
            Some(set) => {
                set(value);
                Ok(())
            }
            None => Err(Error::ReadOnly { name: self.name }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;

    #[test]
    fn cell_accessor_reads_and_writes() {
        let rt = Runtime::new();
        let label = rt.cell(String::from("milk"));
        let accessor = Accessor::from_cell("label", label.clone());

        assert_eq!(accessor.get(), "milk");
        accessor.set("eggs".into()).unwrap();
        assert_eq!(label.get_untracked(), "eggs");
        assert!(accessor.is_writable());
    }

    #[test]
    fn readonly_accessor_rejects_writes() {
        let rt = Runtime::new();
        let count = rt.cell(3);
        let left = Accessor::readonly(
            "items_left",
            rt.computed({
                let count = count.clone();
                move || count.get()
            }),
        );

        assert_eq!(left.get(), 3);
        let err = left.set(0).unwrap_err();
        assert!(matches!(err, Error::ReadOnly { name: "items_left" }));
        assert_eq!(err.to_string(), "accessor `items_left` is read-only");
    }

    #[test]
    fn writable_derivation_maps_back_to_cells() {
        let rt = Runtime::new();
        let celsius = rt.cell(100.0_f64);
        let fahrenheit = Accessor::with_setter(
            "fahrenheit",
            {
                let celsius = celsius.clone();
                move || celsius.get() * 9.0 / 5.0 + 32.0
            },
            {
                let celsius = celsius.clone();
                move |f: f64| celsius.set((f - 32.0) * 5.0 / 9.0)
            },
        );

        assert_eq!(fahrenheit.get(), 212.0);
        fahrenheit.set(32.0).unwrap();
        assert_eq!(celsius.get_untracked(), 0.0);
    }

    #[test]
    fn accessor_reads_are_tracked() {
        let rt = Runtime::new();
        let done = rt.cell(false);
        let accessor = Accessor::from_cell("done", done.clone());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let _effect = rt.effect_with(crate::EffectOptions::new().sync(true), {
            let (accessor, seen) = (accessor.clone(), seen.clone());
            move || seen.lock().push(accessor.get())
        });
        accessor.set(true).unwrap();

        assert_eq!(*seen.lock(), vec![false, true]);
        assert_eq!(format!("{accessor:?}"), r#"Accessor { name: "done", writable: true }"#);
    }
}
