/**
 * Lifecycle manager
 *
 * Binds one view to one thread at a time. Every bind and unbind bumps a generation
 * counter; outcomes tagged with an older generation are dropped at commit time, which
 * is how a fetch for thread A that lands after the view moved to thread B is ignored.
 */
use super::config::SyncConfig;
use super::coordinator::{FetchCoordinator, FetchOutcome};
use super::data_cache::ResourceCache;
use super::errors::SyncError;
use super::fetcher::ThreadSource;
use super::mutation::MutationCoordinator;
use super::poller::{AdaptivePoller, CommitFn, PollerHandle, PollerState};
use super::snapshot::{Identity, ResourceKey};
use super::state::{SyncState, ViewState};
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info};

struct Binding {
    key: ResourceKey,
    generation: u64,
    poller: PollerHandle,
}

pub struct ThreadView {
    coordinator: FetchCoordinator,
    mutations: MutationCoordinator,
    config: SyncConfig,
    state_tx: Arc<watch::Sender<ViewState>>,
    binding: Mutex<Option<Binding>>,
}

impl std::fmt::Debug for ThreadView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.state_tx.borrow();
        f.debug_struct("ThreadView")
            .field("key", &view.key)
            .field("generation", &view.generation)
            .finish_non_exhaustive()
    }
}

impl ThreadView {
    /// View with its own cache and fetch coordinator
    #[must_use]
    pub fn new(source: Arc<dyn ThreadSource>, config: SyncConfig) -> Self {
        let cache = Arc::new(
            config
                .cache_capacity
                .map_or_else(ResourceCache::new, ResourceCache::with_capacity),
        );
        let coordinator = FetchCoordinator::new(source, cache, config.fetch_timeout);
        Self::with_coordinator(coordinator, config)
    }

    /// View sharing a cache and single-flight table with other views
    #[must_use]
    pub fn with_coordinator(coordinator: FetchCoordinator, config: SyncConfig) -> Self {
        let mutations =
            MutationCoordinator::new(coordinator.clone(), config.fetch_timeout, config.max_reply_chars);
        let (state_tx, _) = watch::channel(ViewState::default());

        Self {
            coordinator,
            mutations,
            config,
            state_tx: Arc::new(state_tx),
            binding: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> {
        self.coordinator.cache()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &FetchCoordinator {
        &self.coordinator
    }

    /// Current state plus every later change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.state_tx.subscribe()
    }

    /// Same as [`Self::subscribe`], as a stream that starts with the current state
    #[must_use]
    pub fn updates(&self) -> WatchStream<ViewState> {
        WatchStream::new(self.state_tx.subscribe())
    }

    #[must_use]
    pub fn current(&self) -> ViewState {
        self.state_tx.borrow().clone()
    }

    pub async fn bound_key(&self) -> Option<ResourceKey> {
        self.binding.lock().await.as_ref().map(|b| b.key.clone())
    }

    /// Poller state of the current binding, `None` when unbound
    pub async fn poller_state(&self) -> Option<PollerState> {
        self.binding.lock().await.as_ref().map(|b| b.poller.state())
    }

    /// Fetches performed by the current binding's poller
    pub async fn poll_count(&self) -> Option<u64> {
        self.binding.lock().await.as_ref().map(|b| b.poller.poll_count())
    }

    /// Point the view at `key`. Binding to the key already bound does nothing.
    pub async fn bind(&self, key: ResourceKey) {
        let mut binding = self.binding.lock().await;

        if let Some(current) = binding.as_ref() {
            if current.key == key {
                debug!("🔗 BIND no-op, already on {}", key.cache_key());
                return;
            }
        }
        if let Some(old) = binding.take() {
            self.teardown(old);
        }

        let previous = self.coordinator.cache().get(&key).await;
        let mut generation = 0;
        self.state_tx.send_modify(|view| {
            view.generation += 1;
            generation = view.generation;
            view.key = Some(key.clone());
            view.sync = SyncState::Fetching { previous };
            view.pending_submissions = 0;
        });

        let poller = AdaptivePoller::new(
            key.clone(),
            self.coordinator.clone(),
            &self.config,
            self.commit_fn(generation),
        )
        .start();

        info!("🔗 BIND: {} (generation {})", key.cache_key(), generation);
        *binding = Some(Binding {
            key,
            generation,
            poller,
        });
    }

    /// Stop polling and forget the bound thread. Outcomes still in flight are dropped.
    pub async fn unbind(&self) {
        if let Some(old) = self.binding.lock().await.take() {
            self.teardown(old);
        }
    }

    /// Fetch the bound thread now, sharing any request already in flight.
    ///
    /// # Errors
    ///
    /// `NotBound` without a binding, otherwise the fetch error.
    pub async fn refresh(&self) -> FetchOutcome {
        let (key, generation) = self.binding_tag().await?;
        info!("🔃 REFRESH: {}", key.cache_key());

        let outcome = self.coordinator.fetch(&key).await;
        self.commit_and_hint(generation, &outcome, false).await;
        outcome
    }

    /// Submit a reply to the bound thread as `identity`.
    ///
    /// The view counts as submitting until the refetch after the server's acknowledgment
    /// has resolved. Each submission is counted off in the same update that commits its
    /// refetch, so overlapping replies keep the view submitting until the last one lands.
    ///
    /// # Errors
    ///
    /// `NotBound`, or the submission error. A failed refetch after an accepted reply is
    /// not an error here; it shows up in the view state.
    pub async fn submit_reply(&self, body: &str, identity: Option<&Identity>) -> Result<(), SyncError> {
        let (key, generation) = self.binding_tag().await?;

        self.state_tx.send_if_modified(|view| {
            if view.generation != generation {
                return false;
            }
            view.pending_submissions += 1;
            true
        });

        match self.mutations.submit_reply(&key, body, identity).await {
            Ok(refetch) => {
                self.commit_and_hint(generation, &refetch, true).await;
                Ok(())
            }
            Err(e) => {
                self.state_tx.send_if_modified(|view| {
                    if view.generation != generation || view.pending_submissions == 0 {
                        return false;
                    }
                    view.pending_submissions -= 1;
                    true
                });
                Err(e)
            }
        }
    }

    async fn binding_tag(&self) -> Result<(ResourceKey, u64), SyncError> {
        self.binding
            .lock()
            .await
            .as_ref()
            .map(|b| (b.key.clone(), b.generation))
            .ok_or(SyncError::NotBound)
    }

    async fn commit_and_hint(&self, generation: u64, outcome: &FetchOutcome, finishes_submission: bool) {
        let Some(seq) = commit(&self.state_tx, generation, outcome, finishes_submission) else {
            debug!("Dropping outcome for stale generation {}", generation);
            return;
        };

        let binding = self.binding.lock().await;
        if let Some(current) = binding.as_ref().filter(|b| b.generation == generation) {
            current.poller.reevaluate(outcome, seq).await;
        }
    }

    fn commit_fn(&self, generation: u64) -> CommitFn {
        let state_tx = self.state_tx.clone();
        Arc::new(move |outcome| commit(&state_tx, generation, outcome, false))
    }

    fn teardown(&self, old: Binding) {
        old.poller.shutdown();
        self.state_tx.send_modify(|view| {
            view.generation += 1;
            view.key = None;
            view.sync = SyncState::Idle;
            view.pending_submissions = 0;
        });
        info!("🔌 UNBIND: {} (generation {})", old.key.cache_key(), old.generation);
    }
}

/// Apply `outcome` to the view if it still belongs to `generation`.
///
/// Returns the view's commit sequence after the update, or `None` when the generation
/// is stale and nothing was committed.
fn commit(
    state_tx: &watch::Sender<ViewState>,
    generation: u64,
    outcome: &FetchOutcome,
    finishes_submission: bool,
) -> Option<u64> {
    let mut seq = None;
    state_tx.send_if_modified(|view| {
        if view.generation != generation {
            return false;
        }

        let mut changed = false;
        if !matches!(outcome, Err(SyncError::Superseded)) {
            view.sync = view.sync.apply(outcome);
            view.commits += 1;
            changed = true;
        }
        if finishes_submission && view.pending_submissions > 0 {
            view.pending_submissions -= 1;
            changed = true;
        }
        seq = Some(view.commits);
        changed
    });
    seq
}
