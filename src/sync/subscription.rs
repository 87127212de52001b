use super::snapshot::{ResourceKey, ThreadSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// A new snapshot was stored for `key`
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub key: ResourceKey,
    pub snapshot: Arc<ThreadSnapshot>,
}

pub struct Subscription {
    pub id: String,
    pub key: ResourceKey,
    pub sender: mpsc::UnboundedSender<SnapshotUpdate>,
}

impl Subscription {
    #[must_use]
    pub fn new(key: ResourceKey) -> (Self, mpsc::UnboundedReceiver<SnapshotUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4().to_string();

        (
            Self {
                id,
                key,
                sender: tx,
            },
            rx,
        )
    }
}

pub struct SubscriptionManager {
    subscriptions: Arc<RwLock<HashMap<ResourceKey, Vec<Subscription>>>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager").finish_non_exhaustive()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn subscribe(
        &self,
        key: ResourceKey,
    ) -> (String, mpsc::UnboundedReceiver<SnapshotUpdate>) {
        let (subscription, receiver) = Subscription::new(key.clone());
        let id = subscription.id.clone();

        self.subscriptions
            .write()
            .await
            .entry(key)
            .or_default()
            .push(subscription);

        (id, receiver)
    }

    pub async fn unsubscribe(&self, subscription_id: &str) {
        let mut subs = self.subscriptions.write().await;

        for subscriptions in subs.values_mut() {
            subscriptions.retain(|s| s.id != subscription_id);
        }

        subs.retain(|_, v| !v.is_empty());
    }

    /// Hand `snapshot` to every subscriber of `key`.
    ///
    /// Channels are unbounded, so every live subscriber has the update queued by the
    /// time this returns. Subscribers whose receiver is gone are dropped.
    pub async fn notify(&self, key: &ResourceKey, snapshot: Arc<ThreadSnapshot>) {
        let mut subs = self.subscriptions.write().await;
        let Some(subscriptions) = subs.get_mut(key) else {
            return;
        };

        let update = SnapshotUpdate {
            key: key.clone(),
            snapshot,
        };
        subscriptions.retain(|subscription| {
            let delivered = subscription.sender.send(update.clone()).is_ok();
            if !delivered {
                debug!("🔕 Dropping closed subscription {} for {}", subscription.id, key.cache_key());
            }
            delivered
        });

        if subscriptions.is_empty() {
            subs.remove(key);
        }
    }

    pub async fn active_subscriptions(&self) -> usize {
        let subs = self.subscriptions.read().await;
        subs.values().map(Vec::len).sum()
    }

    pub async fn subscribed_keys(&self) -> Vec<ResourceKey> {
        let subs = self.subscriptions.read().await;
        subs.keys().cloned().collect()
    }
}
