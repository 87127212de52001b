use super::coordinator::{FetchCoordinator, FetchOutcome};
use super::errors::SyncError;
use super::fetcher::ReplyRequest;
use super::snapshot::{Identity, ResourceKey};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Submits replies and makes sure the cache reflects them afterwards
#[derive(Debug, Clone)]
pub struct MutationCoordinator {
    fetches: FetchCoordinator,
    request_timeout: Duration,
    max_reply_chars: usize,
}

impl MutationCoordinator {
    #[must_use]
    pub const fn new(fetches: FetchCoordinator, request_timeout: Duration, max_reply_chars: usize) -> Self {
        Self {
            fetches,
            request_timeout,
            max_reply_chars,
        }
    }

    /// Post a reply to `key`, then refetch the thread.
    ///
    /// `Err` means the reply was not accepted. `Ok` carries the outcome of the refetch
    /// issued after the server acknowledged the write; that refetch may itself have failed,
    /// but it never comes back `Superseded`.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` or `Validation` before anything is sent, otherwise whatever the
    /// server answered (`Unauthenticated`, `Validation`, `NotFound`, `Network`).
    pub async fn submit_reply(
        &self,
        key: &ResourceKey,
        body: &str,
        identity: Option<&Identity>,
    ) -> Result<FetchOutcome, SyncError> {
        let request = validate_reply(body, identity, self.max_reply_chars)?;
        info!(
            "✉️  REPLY SUBMIT: {} as {} ({} chars)",
            key.cache_key(),
            request.identity.username,
            request.body.chars().count()
        );

        let source = self.fetches.source();
        let acknowledged = match timeout(self.request_timeout, source.submit_reply(key, &request)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Network(format!(
                "reply to thread {key} timed out after {}ms",
                self.request_timeout.as_millis()
            ))),
        };
        if let Err(e) = acknowledged {
            warn!("❌ REPLY REJECTED: {} - {}", key.cache_key(), e);
            return Err(e);
        }

        info!("📬 REPLY ACK: {}, refetching", key.cache_key());
        let mut outcome = self.fetches.force_refetch(key).await;
        // A later acknowledged write outdated our refetch; its own refetch carries our reply too.
        while matches!(outcome, Err(SyncError::Superseded)) {
            debug!("🔁 REPLY REFETCH superseded for {}, joining newer fetch", key.cache_key());
            outcome = self.fetches.fetch(key).await;
        }
        Ok(outcome)
    }
}

/// Check a reply before it goes anywhere near the network.
///
/// # Errors
///
/// `Unauthenticated` without a usable identity, `Validation` for a blank or oversized body.
pub fn validate_reply(
    body: &str,
    identity: Option<&Identity>,
    max_chars: usize,
) -> Result<ReplyRequest, SyncError> {
    let identity = identity.ok_or_else(|| SyncError::Unauthenticated("log in to reply".to_string()))?;
    if identity.token.trim().is_empty() {
        return Err(SyncError::Unauthenticated("missing bearer token".to_string()));
    }
    if identity.username.trim().is_empty() {
        return Err(SyncError::Unauthenticated("missing username".to_string()));
    }

    let body = body.trim();
    if body.is_empty() {
        return Err(SyncError::Validation("reply body is empty".to_string()));
    }
    let chars = body.chars().count();
    if chars > max_chars {
        return Err(SyncError::Validation(format!(
            "reply body is {chars} characters, the limit is {max_chars}"
        )));
    }

    Ok(ReplyRequest {
        body: body.to_string(),
        identity: identity.clone(),
    })
}
