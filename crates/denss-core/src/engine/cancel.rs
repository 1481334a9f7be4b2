use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cooperative cancellation flag.
///
/// Clones observe the same flag. Long-running loops poll [`AbortFlag::is_raised`] at
/// well-defined points and stop with [`RunOutcome::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a cancellable computation. Cancellation is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum RunOutcome<T> {
    Completed(T),
    Aborted,
}

impl<T> RunOutcome<T> {
    pub fn is_aborted(&self) -> bool {
        matches!(self, RunOutcome::Aborted)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            RunOutcome::Completed(value) => Some(value),
            RunOutcome::Aborted => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunOutcome<U> {
        match self {
            RunOutcome::Completed(value) => RunOutcome::Completed(f(value)),
            RunOutcome::Aborted => RunOutcome::Aborted,
        }
    }
}

/// Unwraps a `RunOutcome`, returning `RunOutcome::Aborted` from the enclosing function
/// when the computation was cancelled.
macro_rules! completed_or_return {
    ($outcome:expr) => {
        match $outcome {
            $crate::engine::cancel::RunOutcome::Completed(value) => value,
            $crate::engine::cancel::RunOutcome::Aborted => {
                return Ok($crate::engine::cancel::RunOutcome::Aborted);
            }
        }
    };
}

pub(crate) use completed_or_return;
