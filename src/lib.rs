#![deny(missing_docs)]

//! Fine-grained reactive state driving retained-mode view updates.
//!
//! Application state lives in [`ReactiveCell`]s. Effects record which cells
//! they read and re-run when one of them is written; a [`RenderBridge`] turns
//! such an effect into "re-render this component, and only this component",
//! and [`KeyedList`] keeps list rows from being rebuilt when their key
//! survives.
//!
//! # Quick Start
//!
//! ```ignore
//! use reaktiv_bridge::{EffectOptions, RenderBridge, Runtime};
//!
//! let rt = Runtime::new();
//! let count = rt.cell(0);
//!
//! let mut label = RenderBridge::new(
//!     &rt,
//!     EffectOptions::new(),
//!     {
//!         let count = count.clone();
//!         move || Ok(format!("{} clicks", count.get()))
//!     },
//!     |text| println!("commit: {text}"),
//! )?;
//! label.start();
//!
//! count.set(1);
//! count.set(2);
//! rt.flush(); // commit: 2 clicks
//! ```
//!
//! # Core Types
//!
//! - [`Runtime`] - Reactive root: arenas, current observer, scheduler.
//! - [`ReactiveCell<T>`] - Mutable slot. Tracked reads, notifying writes.
//! - [`Effect`] - Re-runs its job when what it read changes.
//! - [`Computed<T>`] - Lazy memoized derivation.
//! - [`RenderBridge<T>`] - Effect bound to a component's mount/unmount.
//! - [`KeyedList<K, F>`] - Fragment cache for keyed collections.
//!
//! # Scheduling
//!
//! ```ignore
//! EffectOptions::new();            // batched: runs at the next flush, once
//! EffectOptions::new().sync(true); // inline on every write
//! EffectOptions::new().manual();   // dirty flag only; run_if_dirty()
//!
//! rt.batch(|| { a.set(1); b.set(2); }); // flushes once on exit
//! rt.untracked(|| hidden.get());        // read without subscribing
//! ```
//!
//! A host event loop hooks [`RuntimeBuilder::on_flush_requested`] and calls
//! [`Runtime::flush`] once the current call stack has returned.

// Internal modules
pub(crate) mod arena;
mod batch;
mod bridge;
mod cell;
mod computed;
mod effect;
mod error;
mod hash;
mod identity;
mod list;
mod model;
mod runtime;
mod scheduler;
mod value;

// Core types
pub use arena::{CellId, EffectId};
pub use bridge::{Phase, RenderBridge};
pub use cell::ReactiveCell;
pub use computed::Computed;
pub use effect::{CellHook, Effect, EffectOptions, Schedule, StopHook};
pub use list::{KeyedList, keyed_list};
pub use model::Accessor;
pub use runtime::{ErrorHook, Runtime, RuntimeBuilder};
pub use value::Value;

// Supporting types
pub use error::{BoxError, Error, Result};
pub use identity::Identity;
pub use scheduler::{DEFAULT_RECURSION_LIMIT, FlushHook};
