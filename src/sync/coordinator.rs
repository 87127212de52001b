/**
 * Single-flight fetch coordination
 *
 * At most one request per thread is outstanding at a time; concurrent callers share
 * its outcome. Every flight commits to the cache exactly once, from its own task, so
 * a caller going away mid-fetch never loses the result for everyone else.
 */
use super::data_cache::ResourceCache;
use super::errors::{SyncError, task_lost_error, timeout_error};
use super::fetcher::ThreadSource;
use super::snapshot::{ResourceKey, ThreadSnapshot};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// What every waiter on a fetch gets back
pub type FetchOutcome = Result<Arc<ThreadSnapshot>, SyncError>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

struct Flight {
    id: u64,
    /// Write epoch of the key when this flight started
    epoch: u64,
    outcome: SharedFetch,
}

#[derive(Default)]
struct FlightTable {
    flights: HashMap<ResourceKey, Flight>,
    /// Bumped each time a write to the key is acknowledged
    write_epochs: HashMap<ResourceKey, u64>,
    next_flight_id: u64,
}

impl FlightTable {
    fn epoch(&self, key: &ResourceKey) -> u64 {
        self.write_epochs.get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Requests actually sent to the source
    pub requests_started: u64,
    /// Callers that attached to a request already in flight
    pub requests_joined: u64,
    /// Results thrown away because a write landed while they were in flight
    pub results_superseded: u64,
}

struct Inner {
    source: Arc<dyn ThreadSource>,
    cache: Arc<ResourceCache>,
    fetch_timeout: Duration,
    table: Mutex<FlightTable>,
    requests_started: AtomicU64,
    requests_joined: AtomicU64,
    results_superseded: AtomicU64,
}

#[derive(Clone)]
pub struct FetchCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("source", &self.inner.source.name())
            .field("fetch_timeout", &self.inner.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl FetchCoordinator {
    #[must_use]
    pub fn new(
        source: Arc<dyn ThreadSource>,
        cache: Arc<ResourceCache>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                cache,
                fetch_timeout,
                table: Mutex::new(FlightTable::default()),
                requests_started: AtomicU64::new(0),
                requests_joined: AtomicU64::new(0),
                results_superseded: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.inner.cache
    }

    #[must_use]
    pub fn source(&self) -> &Arc<dyn ThreadSource> {
        &self.inner.source
    }

    /// Fetch `key`, sharing the outcome of a request that is already outstanding.
    ///
    /// A request that started before the latest acknowledged write to `key` is never
    /// joined; a new one is issued instead.
    pub async fn fetch(&self, key: &ResourceKey) -> FetchOutcome {
        let outcome = {
            let mut table = self.inner.table.lock().await;
            let epoch = table.epoch(key);

            match table.flights.get(key) {
                Some(flight) if flight.epoch == epoch => {
                    debug!("🔗 FETCH JOIN: {} (flight {})", key.cache_key(), flight.id);
                    self.inner.requests_joined.fetch_add(1, Ordering::Relaxed);
                    flight.outcome.clone()
                }
                _ => self.start_flight(&mut table, key, epoch),
            }
        };

        outcome.await
    }

    /// Record that a write to `key` was acknowledged, then refetch it.
    ///
    /// Anything in flight for `key` from before this call is discarded when it resolves.
    pub async fn force_refetch(&self, key: &ResourceKey) -> FetchOutcome {
        let epoch = {
            let mut table = self.inner.table.lock().await;
            let epoch = table.write_epochs.entry(key.clone()).or_insert(0);
            *epoch += 1;
            *epoch
        };
        self.inner.cache.invalidate(key).await;
        debug!("✍️  WRITE EPOCH: {} -> {}", key.cache_key(), epoch);

        self.fetch(key).await
    }

    pub async fn in_flight_count(&self) -> usize {
        self.inner.table.lock().await.flights.len()
    }

    #[must_use]
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_joined: self.inner.requests_joined.load(Ordering::Relaxed),
            results_superseded: self.inner.results_superseded.load(Ordering::Relaxed),
        }
    }

    fn start_flight(&self, table: &mut FlightTable, key: &ResourceKey, epoch: u64) -> SharedFetch {
        let id = table.next_flight_id;
        table.next_flight_id += 1;
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move { inner.run_flight(task_key, epoch, id).await });

        let lost_key = key.clone();
        let outcome = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(task_lost_error(&lost_key, &e.to_string())),
            }
        }
        .boxed()
        .shared();

        table.flights.insert(
            key.clone(),
            Flight {
                id,
                epoch,
                outcome: outcome.clone(),
            },
        );

        outcome
    }
}

impl Inner {
    async fn run_flight(&self, key: ResourceKey, epoch: u64, id: u64) -> FetchOutcome {
        let start = Instant::now();
        info!("🔄 FETCH START: {} (flight {}, epoch {})", key.cache_key(), id, epoch);

        let result = match timeout(self.fetch_timeout, self.source.fetch_thread(&key)).await {
            Ok(result) => result,
            Err(_) => Err(timeout_error(&key, self.fetch_timeout)),
        };
        let elapsed = start.elapsed();

        // Held until the commit is done so an acknowledged write cannot slip in between
        let mut table = self.table.lock().await;
        if table.flights.get(&key).is_some_and(|flight| flight.id == id) {
            table.flights.remove(&key);
        }

        let outcome = if table.epoch(&key) != epoch {
            self.results_superseded.fetch_add(1, Ordering::Relaxed);
            info!(
                "⏭️  FETCH SUPERSEDED: {} ({:.2}s), a reply was acknowledged meanwhile",
                key.cache_key(),
                elapsed.as_secs_f64()
            );
            Err(SyncError::Superseded)
        } else {
            match result {
                Ok(snapshot) => {
                    info!("✅ FETCH SUCCESS: {} ({:.2}s)", key.cache_key(), elapsed.as_secs_f64());
                    let snapshot = Arc::new(snapshot);
                    self.cache.put(&key, snapshot.clone()).await;
                    Ok(snapshot)
                }
                Err(e) => {
                    if e.is_terminal() {
                        error!("❌ FETCH FAILED: {} ({:.2}s) - {}", key.cache_key(), elapsed.as_secs_f64(), e);
                    } else {
                        warn!("⚠️  FETCH FAILED: {} ({:.2}s) - {}", key.cache_key(), elapsed.as_secs_f64(), e);
                    }
                    self.cache.record_error(&key, e.clone()).await;
                    Err(e)
                }
            }
        };
        drop(table);

        outcome
    }
}
