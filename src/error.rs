use std::any::Any;

use thiserror::Error;

use crate::arena::EffectId;

/// Boxed error produced by user render code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by the reactive runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A render job or item renderer returned an error.
    #[error("render job failed: {0}")]
    Job(#[source] BoxError),

    /// A job panicked during a re-run. The panic was contained and the effect
    /// stays subscribed.
    #[error("effect {effect:?} panicked: {message}")]
    Panicked {
        /// The effect whose job panicked.
        effect: EffectId,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A job kept re-entering the queue within a single flush.
    #[error("effect {effect:?} re-queued itself more than {limit} times in one flush")]
    RecursionLimit {
        /// The effect that was dropped from the flush.
        effect: EffectId,
        /// The configured limit.
        limit: usize,
    },

    /// `set` was called on an accessor without a setter.
    #[error("accessor `{name}` is read-only")]
    ReadOnly {
        /// Name of the accessor.
        name: &'static str,
    },
}

impl Error {
    /// Wrap any error raised by user code.
    pub fn job<E>(error: E) -> Self
    where
        E: Into<BoxError>,
    {
        Error::Job(error.into())
    }

    pub(crate) fn panicked(effect: EffectId, payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Error::Panicked { effect, message }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
