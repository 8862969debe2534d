#![forbid(unsafe_code)]

//! Error type shared by list models, decorators and listeners.
//!
//! Every failure in this crate is a programming or consistency error: list
//! operations are synchronous and deterministic, so nothing here is retried.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Outcome of a single listener callback.
///
/// Dispatch policy: with exactly one subscriber an `Err` propagates back to
/// the mutating call; with several, it is logged and delivery continues.
pub type ListenerResult = Result<()>;

/// Errors reported by list models.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// An index outside `0..len` was used.
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A half-open range `from..to` does not fit `0..=len`.
    #[error("invalid range {from}..{to} (length {len})")]
    InvalidRange { from: usize, to: usize, len: usize },

    /// An event was fired while the same dispatcher was still delivering.
    #[error("reentrant dispatch: event fired while listeners were being notified")]
    ReentrantDispatch,

    /// A list was mounted twice in the same segmented list.
    #[error("list is already mounted as segment {position}")]
    DuplicateSegment { position: usize },

    /// A listener callback failed.
    #[error("listener failed: {message}")]
    Listener { message: String },

    /// Derived bookkeeping disagrees with the source.
    #[error("inconsistent state: {message}")]
    Inconsistent { message: String },
}

impl ModelError {
    /// Build a listener failure.
    #[must_use]
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Build an inconsistency report.
    #[must_use]
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
        if index < len {
            Ok(())
        } else {
            Err(Self::IndexOutOfBounds { index, len })
        }
    }

    pub(crate) fn check_range(from: usize, to: usize, len: usize) -> Result<()> {
        if from <= to && to <= len {
            Ok(())
        } else {
            Err(Self::InvalidRange { from, to, len })
        }
    }
}

/// Keeps the first error of a multi-step mutation.
///
/// Each step still commits; the caller reports the first failure once all
/// steps are done.
#[derive(Debug, Default)]
pub(crate) struct FirstError(Option<ModelError>);

impl FirstError {
    pub(crate) fn new() -> Self {
        Self(None)
    }

    pub(crate) fn record(&mut self, result: Result<()>) {
        if let Err(err) = result {
            self.0.get_or_insert(err);
        }
    }

    /// Record a step that yields a value; a failed step yields `fallback`.
    pub(crate) fn record_or<V>(&mut self, result: Result<V>, fallback: V) -> V {
        match result {
            Ok(value) => value,
            Err(err) => {
                self.0.get_or_insert(err);
                fallback
            }
        }
    }

    pub(crate) fn finish(self) -> Result<()> {
        match self.0 {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
