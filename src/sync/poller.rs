/**
 * Adaptive poller
 *
 * Refetches a bound thread for as long as the last committed outcome says the server
 * is still generating a reply. One poller task per binding; it owns the only timer.
 */
use super::config::{POLLER_CHANNEL_CAPACITY, RetryPolicy, SyncConfig};
use super::coordinator::{FetchCoordinator, FetchOutcome};
use super::errors::SyncError;
use super::snapshot::ResourceKey;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Scheduled(Instant),
    InFlight,
}

/// What a fetch outcome means for polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDecision {
    /// Keep polling. `transient_error` is set when the outcome was a retryable failure.
    Continue { transient_error: bool },
    Stop,
    /// Outcome carries no information about the thread, keep whatever was planned
    Unchanged,
}

impl PollDecision {
    #[must_use]
    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        match outcome {
            Ok(snapshot) if snapshot.generation_in_progress => Self::Continue {
                transient_error: false,
            },
            Ok(_) => Self::Stop,
            Err(SyncError::Superseded | SyncError::NotBound) => Self::Unchanged,
            Err(e) if e.is_terminal() => Self::Stop,
            Err(e) if e.is_mutation_only() => Self::Unchanged,
            Err(_) => Self::Continue {
                transient_error: true,
            },
        }
    }
}

/// Commits an outcome to the owning view and returns the view's commit sequence.
/// Returns `None` once the binding that started the poller is gone.
pub type CommitFn = Arc<dyn Fn(&FetchOutcome) -> Option<u64> + Send + Sync>;

/// Decision from an outcome committed outside the poller, tagged with its commit sequence
#[derive(Debug, Clone, Copy)]
struct Hint {
    decision: PollDecision,
    seq: u64,
}

pub struct AdaptivePoller {
    key: ResourceKey,
    coordinator: FetchCoordinator,
    interval: Duration,
    retry: RetryPolicy,
    commit: CommitFn,
    state_tx: watch::Sender<PollerState>,
    polls: Arc<AtomicU64>,
}

impl AdaptivePoller {
    #[must_use]
    pub fn new(key: ResourceKey, coordinator: FetchCoordinator, config: &SyncConfig, commit: CommitFn) -> Self {
        let (state_tx, _) = watch::channel(PollerState::Stopped);
        Self {
            key,
            coordinator,
            interval: config.poll_interval,
            retry: config.retry,
            commit,
            state_tx,
            polls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the poll loop. The first fetch goes out immediately.
    #[must_use]
    pub fn start(self) -> PollerHandle {
        let (hint_tx, hint_rx) = mpsc::channel(POLLER_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let state_rx = self.state_tx.subscribe();
        let polls = self.polls.clone();
        let key = self.key.clone();

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            self.run(hint_rx, token).await;
        });

        PollerHandle {
            key,
            hint_tx,
            state_rx,
            polls,
            cancel,
            task,
        }
    }

    async fn run(self, mut hints: mpsc::Receiver<Hint>, cancel: CancellationToken) {
        info!("🚀 Poller started for {}", self.key.cache_key());
        let mut state = PollerState::InFlight;
        let mut consecutive_errors = 0_u32;
        let mut last_seq = 0_u64;

        loop {
            self.publish(state);

            match state {
                PollerState::InFlight => {
                    let outcome = tokio::select! {
                        () = cancel.cancelled() => break,
                        outcome = self.coordinator.fetch(&self.key) => outcome,
                    };
                    self.polls.fetch_add(1, Ordering::Relaxed);

                    let Some(seq) = (self.commit)(&outcome) else {
                        debug!("🔌 Poller for {} outlived its binding", self.key.cache_key());
                        break;
                    };
                    last_seq = last_seq.max(seq);
                    state = self.next_state(
                        state,
                        PollDecision::from_outcome(&outcome),
                        &mut consecutive_errors,
                    );
                }
                PollerState::Scheduled(at) => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = sleep_until(at) => state = PollerState::InFlight,
                        hint = hints.recv() => match hint {
                            Some(hint) => {
                                state = self.apply_hint(state, hint, &mut last_seq, &mut consecutive_errors);
                            }
                            None => break,
                        },
                    }
                }
                PollerState::Stopped => {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        hint = hints.recv() => match hint {
                            Some(hint) => {
                                state = self.apply_hint(state, hint, &mut last_seq, &mut consecutive_errors);
                            }
                            None => break,
                        },
                    }
                }
            }
        }

        self.publish(PollerState::Stopped);
        info!("🛑 Poller stopped for {}", self.key.cache_key());
    }

    /// Hints older than the last outcome the poller committed describe a past thread state
    fn apply_hint(
        &self,
        current: PollerState,
        hint: Hint,
        last_seq: &mut u64,
        consecutive_errors: &mut u32,
    ) -> PollerState {
        if hint.seq < *last_seq {
            debug!(
                "Dropping stale hint for {} (commit {} < {})",
                self.key.cache_key(),
                hint.seq,
                last_seq
            );
            return current;
        }
        *last_seq = hint.seq;
        self.next_state(current, hint.decision, consecutive_errors)
    }

    fn next_state(&self, current: PollerState, decision: PollDecision, consecutive_errors: &mut u32) -> PollerState {
        match decision {
            PollDecision::Continue { transient_error } => {
                if transient_error {
                    *consecutive_errors = consecutive_errors.saturating_add(1);
                } else {
                    *consecutive_errors = 0;
                }

                if let PollerState::Scheduled(at) = current {
                    return PollerState::Scheduled(at);
                }
                let delay = self.retry.delay(self.interval, *consecutive_errors);
                debug!(
                    "⏱️  Poll scheduled for {} in {}ms",
                    self.key.cache_key(),
                    delay.as_millis()
                );
                PollerState::Scheduled(Instant::now() + delay)
            }
            PollDecision::Stop => {
                *consecutive_errors = 0;
                if current != PollerState::Stopped {
                    info!("⏹️  Polling finished for {}", self.key.cache_key());
                }
                PollerState::Stopped
            }
            PollDecision::Unchanged => current,
        }
    }

    fn publish(&self, state: PollerState) {
        self.state_tx.send_replace(state);
    }
}

/// Owner's side of a running poller. Dropping it stops the poller.
pub struct PollerHandle {
    key: ResourceKey,
    hint_tx: mpsc::Sender<Hint>,
    state_rx: watch::Receiver<PollerState>,
    polls: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    #[must_use]
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Feed an outcome produced outside the poller (manual refresh, post-reply refetch).
    ///
    /// `seq` is the view's commit sequence right after that outcome was committed. The
    /// poller ignores the hint if it has since committed a newer outcome of its own.
    pub async fn reevaluate(&self, outcome: &FetchOutcome, seq: u64) {
        let decision = PollDecision::from_outcome(outcome);
        if decision == PollDecision::Unchanged {
            return;
        }
        if self.hint_tx.send(Hint { decision, seq }).await.is_err() {
            debug!("Poller for {} already gone, dropping hint", self.key.cache_key());
        }
    }

    #[must_use]
    pub fn state(&self) -> PollerState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<PollerState> {
        self.state_rx.clone()
    }

    /// Fetches the poller itself has completed
    #[must_use]
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Disarm the timer and end the task
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
