use super::errors::SyncError;
use super::snapshot::{ResourceKey, ThreadSnapshot};
use std::sync::Arc;

/// Sync status of the thread a view is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    /// Waiting for the first outcome of a binding. `previous` is whatever the cache
    /// already held for the key, shown instead of a blank view.
    Fetching {
        previous: Option<Arc<ThreadSnapshot>>,
    },
    Ready(Arc<ThreadSnapshot>),
    Error {
        last_good: Option<Arc<ThreadSnapshot>>,
        error: SyncError,
    },
}

impl SyncState {
    /// The snapshot a consumer may render right now, if any
    #[must_use]
    pub fn displayable(&self) -> Option<&Arc<ThreadSnapshot>> {
        match self {
            Self::Idle => None,
            Self::Fetching { previous } => previous.as_ref(),
            Self::Ready(snapshot) => Some(snapshot),
            Self::Error { last_good, .. } => last_good.as_ref(),
        }
    }

    /// A dedicated error view is only warranted when nothing can be shown or the error is final.
    #[must_use]
    pub fn shows_error_affordance(&self) -> bool {
        match self {
            Self::Error { last_good, error } => last_good.is_none() || error.is_terminal(),
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub const fn error(&self) -> Option<&SyncError> {
        match self {
            Self::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// State after committing a fetch outcome on top of `self`.
    ///
    /// Errors keep the best snapshot known so far; `Superseded` leaves the state alone
    /// because a fresher fetch is already under way.
    #[must_use]
    pub fn apply(&self, outcome: &Result<Arc<ThreadSnapshot>, SyncError>) -> Self {
        match outcome {
            Ok(snapshot) => Self::Ready(snapshot.clone()),
            Err(SyncError::Superseded) => self.clone(),
            Err(error) => Self::Error {
                last_good: self.displayable().cloned(),
                error: error.clone(),
            },
        }
    }
}

/// Everything a subscribed consumer needs to draw one thread view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ViewState {
    pub key: Option<ResourceKey>,
    /// Bumped on every bind and unbind
    pub generation: u64,
    pub sync: SyncState,
    /// Replies on their way to the server whose post-submit refetch has not resolved yet
    pub pending_submissions: u32,
    /// Outcomes applied to `sync` so far, used to order refresh hints against poller ticks
    pub commits: u64,
}

impl ViewState {
    #[must_use]
    pub const fn submitting(&self) -> bool {
        self.pending_submissions > 0
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&Arc<ThreadSnapshot>> {
        self.sync.displayable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(posts: usize) -> Arc<ThreadSnapshot> {
        Arc::new(ThreadSnapshot {
            id: ResourceKey::from(7_u64),
            title: "t".to_string(),
            body: "b".to_string(),
            author: "a".to_string(),
            author_avatar: None,
            created_at: Utc::now(),
            posts: (0..posts)
                .map(|i| super::super::snapshot::Post {
                    id: ResourceKey::from(i as u64),
                    body: String::new(),
                    author: "a".to_string(),
                    author_avatar: None,
                    created_at: Utc::now(),
                    is_generated: false,
                })
                .collect(),
            generation_in_progress: false,
            fetched_at: Utc::now(),
        })
    }

    #[test]
    fn test_network_error_keeps_last_good() {
        let ready = SyncState::Ready(snapshot(3));
        let next = ready.apply(&Err(SyncError::Network("down".into())));

        assert_eq!(next.displayable().map(|s| s.post_count()), Some(3));
        assert!(!next.shows_error_affordance());
        assert!(matches!(next.error(), Some(SyncError::Network(_))));
    }

    #[test]
    fn test_error_without_snapshot_shows_affordance() {
        let fetching = SyncState::Fetching { previous: None };
        let next = fetching.apply(&Err(SyncError::Network("down".into())));
        assert!(next.displayable().is_none());
        assert!(next.shows_error_affordance());
    }

    #[test]
    fn test_terminal_error_shows_affordance_even_with_snapshot() {
        let ready = SyncState::Ready(snapshot(1));
        let next = ready.apply(&Err(SyncError::NotFound(ResourceKey::from(7_u64))));
        assert!(next.displayable().is_some());
        assert!(next.shows_error_affordance());
    }

    #[test]
    fn test_superseded_is_ignored_and_success_replaces() {
        let ready = SyncState::Ready(snapshot(1));
        assert_eq!(ready.apply(&Err(SyncError::Superseded)), ready);

        let errored = ready.apply(&Err(SyncError::Network("x".into())));
        let recovered = errored.apply(&Ok(snapshot(2)));
        assert!(recovered.is_ready());
        assert_eq!(recovered.displayable().map(|s| s.post_count()), Some(2));
    }

    #[test]
    fn test_fetching_shows_previous_snapshot() {
        let state = SyncState::Fetching {
            previous: Some(snapshot(4)),
        };
        assert_eq!(state.displayable().map(|s| s.post_count()), Some(4));
        assert!(!state.shows_error_affordance());
    }
}
