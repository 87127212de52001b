pub mod config;
pub mod coordinator;
pub mod data_cache;
pub mod errors;
pub mod fetcher;
pub mod lifecycle;
pub mod mutation;
pub mod poller;
pub mod snapshot;
pub mod state;
pub mod subscription;

pub use config::{RetryPolicy, SyncConfig};
pub use coordinator::{CoordinatorStats, FetchCoordinator, FetchOutcome};
pub use data_cache::{CacheStats, ResourceCache};
pub use errors::SyncError;
pub use fetcher::{ReplyRequest, ThreadSource};
pub use lifecycle::ThreadView;
pub use mutation::{MutationCoordinator, validate_reply};
pub use poller::{AdaptivePoller, PollDecision, PollerHandle, PollerState};
pub use snapshot::{Identity, NewThread, Post, ResourceKey, ThreadSnapshot, ThreadSummary};
pub use state::{SyncState, ViewState};
pub use subscription::{SnapshotUpdate, Subscription, SubscriptionManager};
