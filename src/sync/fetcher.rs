use super::errors::SyncError;
use super::snapshot::{Identity, NewThread, ResourceKey, ThreadSnapshot, ThreadSummary};
use async_trait::async_trait;

/// A reply ready to go over the wire: already trimmed and validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyRequest {
    pub body: String,
    pub identity: Identity,
}

/// Everything the sync core needs from the forum server.
///
/// Implementations turn every failure into a typed [`SyncError`]; nothing else
/// crosses this boundary.
#[async_trait]
pub trait ThreadSource: Send + Sync {
    /// Current state of one thread, stamped with the time it was retrieved
    async fn fetch_thread(&self, key: &ResourceKey) -> Result<ThreadSnapshot, SyncError>;

    /// Returns once the server has acknowledged the write
    async fn submit_reply(&self, key: &ResourceKey, reply: &ReplyRequest) -> Result<(), SyncError>;

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, SyncError>;

    /// Opens a thread and returns its key. The server starts generating replies for it.
    async fn create_thread(&self, thread: &NewThread) -> Result<ResourceKey, SyncError>;

    /// Short name used in log lines
    fn name(&self) -> &'static str {
        "thread-source"
    }
}
