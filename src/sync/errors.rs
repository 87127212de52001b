/**
 * Typed outcomes for everything that can go wrong while syncing a thread
 */
use super::snapshot::ResourceKey;
use thiserror::Error;

/// Failure of a fetch, a reply submission or a lifecycle call.
///
/// `Clone` so one single-flight outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Transport failure, timeout or unexpected status. Retried by the next poll tick.
    #[error("network error: {0}")]
    Network(String),

    /// The thread does not exist (any more). Terminal for that key.
    #[error("thread {0} not found")]
    NotFound(ResourceKey),

    /// The server answered with a payload we could not understand. Terminal.
    #[error("malformed thread payload: {0}")]
    Decode(String),

    #[error("invalid reply: {0}")]
    Validation(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// The fetch started before a reply was acknowledged and resolved after it.
    #[error("fetch result discarded, a newer write superseded it")]
    Superseded,

    #[error("view is not bound to a thread")]
    NotBound,
}

impl SyncError {
    /// Terminal errors stop polling for the key.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Decode(_))
    }

    /// Transient errors keep the last good snapshot on screen and are retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Superseded)
    }

    /// Errors that only ever come out of a reply submission.
    #[must_use]
    pub const fn is_mutation_only(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Unauthenticated(_))
    }
}

/// Build a `Network` error for a fetch that did not resolve in time
#[must_use]
pub fn timeout_error(key: &ResourceKey, timeout: std::time::Duration) -> SyncError {
    SyncError::Network(format!(
        "fetch for thread {key} timed out after {}ms",
        timeout.as_millis()
    ))
}

/// Build a `Network` error for a fetch task that died before reporting back
#[must_use]
pub fn task_lost_error(key: &ResourceKey, reason: &str) -> SyncError {
    SyncError::Network(format!("fetch task for thread {key} ended early: {reason}"))
}
