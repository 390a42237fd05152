use std::fmt;
use std::sync::Arc;

use crate::{Accessor, Computed, ReactiveCell};

/// A binding that is either a plain value or something reactive.
///
/// Resolved once at binding time: code that accepts a `Value<T>` reads it with
/// [`get`](Value::get) and never has to probe what it was given.
pub enum Value<T> {
    /// A constant. Reading it subscribes to nothing.
    Literal(T),
    /// A cell, read with tracking.
    Cell(ReactiveCell<T>),
    /// A closure re-evaluated on every read. Whatever it reads is tracked.
    Derivation(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T> Value<T> {
    /// Wrap a constant.
    pub fn literal(value: T) -> Self {
        Value::Literal(value)
    }

    /// Wrap a closure that derives the value on each read.
    pub fn derive<F>(f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Value::Derivation(Arc::new(f))
    }

    /// Whether reading this value can subscribe the current effect.
    pub fn is_reactive(&self) -> bool {
        !matches!(self, Value::Literal(_))
    }

    /// Read the current value, tracking it if reactive.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        match self {
            Value::Literal(value) => value.clone(),
            Value::Cell(cell) => cell.get(),
            Value::Derivation(f) => f(),
        }
    }

    /// Borrow the current value, tracking it if reactive.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self {
            Value::Literal(value) => f(value),
            Value::Cell(cell) => cell.with(f),
            Value::Derivation(derive) => f(&derive()),
        }
    }
}

impl<T: Clone> Clone for Value<T> {
    fn clone(&self) -> Self {
        match self {
            Value::Literal(value) => Value::Literal(value.clone()),
            Value::Cell(cell) => Value::Cell(cell.clone()),
            Value::Derivation(f) => Value::Derivation(f.clone()),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Value::Cell(cell) => f.debug_tuple("Cell").field(&cell.id()).finish(),
            Value::Derivation(_) => f.write_str("Derivation(..)"),
        }
    }
}

impl<T> From<ReactiveCell<T>> for Value<T> {
    fn from(cell: ReactiveCell<T>) -> Self {
        Value::Cell(cell)
    }
}

impl<T> From<Computed<T>> for Value<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn from(computed: Computed<T>) -> Self {
        Value::derive(move || computed.get())
    }
}

impl<T> From<Accessor<T>> for Value<T>
where
    T: 'static,
{
    fn from(accessor: Accessor<T>) -> Self {
        Value::derive(move || accessor.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Runtime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn runs_when_read(rt: &Runtime, value: Value<i32>) -> (crate::Effect, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let effect = rt.effect({
            let runs = runs.clone();
            move || {
                runs.fetch_add(1, Ordering::Relaxed);
                let _ = value.get();
            }
        });
        (effect, runs)
    }

    #[test]
    fn literal_is_not_reactive() {
        let value = Value::literal(3);
        assert!(!value.is_reactive());
        assert_eq!(value.get(), 3);
        assert_eq!(value.with(|v| v + 1), 4);
    }

    #[test]
    fn cell_and_computed_bindings_track() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let double = rt.computed({
            let cell = cell.clone();
            move || cell.get() * 2
        });

        let (_e1, from_cell) = runs_when_read(&rt, cell.clone().into());
        let (_e2, from_computed) = runs_when_read(&rt, double.into());

        cell.set(2);
        rt.flush();
        assert_eq!(from_cell.load(Ordering::Relaxed), 2);
        assert_eq!(from_computed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn derivation_evaluates_per_read() {
        let rt = Runtime::new();
        let first = rt.cell(String::from("Ada"));
        let greeting = Value::derive({
            let first = first.clone();
            move || format!("hi {}", first.get())
        });
        assert!(greeting.is_reactive());
        assert_eq!(greeting.get(), "hi Ada");

        first.set("Grace".into());
        assert_eq!(greeting.with(String::len), 8);
        assert!(format!("{greeting:?}").starts_with("Derivation"));
    }
}
