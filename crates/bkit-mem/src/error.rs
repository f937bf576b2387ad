//! Error values reported by the allocation front end.
//!
//! No operation panics or unwinds on failure; allocation-returning calls
//! hand back a [`MemError`] and everything else reports through plain
//! return values (see [`crate::tracker::ReleaseOutcome`]).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemError {
    /// The active backend returned no block for the request.
    #[error("backend could not satisfy a request for {requested} bytes")]
    OutOfMemory { requested: usize },
    /// Tracking tables need at least one slot.
    #[error("tracking table capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),
    /// A backend name that no built-in backend answers to.
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
}

impl MemError {
    #[must_use]
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
