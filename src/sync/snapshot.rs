use chrono::{DateTime, Utc};
use std::fmt;

/// Opaque identifier of a thread. Numeric ids from the server are kept as their decimal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(String);

impl ResourceKey {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for log lines and subscription bookkeeping
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("thread:{}", self.0)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for ResourceKey {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ResourceKey {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: ResourceKey,
    pub body: String,
    pub author: String,
    pub author_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Written by the server-side generation process rather than a person
    pub is_generated: bool,
}

/// Wholesale copy of a thread as the server reported it at `fetched_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    pub id: ResourceKey,
    pub title: String,
    pub body: String,
    pub author: String,
    pub author_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Display order, append-only as far as a consumer is concerned
    pub posts: Vec<Post>,
    /// True while the server is still producing a reply for this thread
    pub generation_in_progress: bool,
    pub fetched_at: DateTime<Utc>,
}

impl ThreadSnapshot {
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    #[must_use]
    pub fn generated_post_count(&self) -> usize {
        self.posts.iter().filter(|p| p.is_generated).count()
    }

    #[must_use]
    pub fn contains_post(&self, id: &ResourceKey) -> bool {
        self.posts.iter().any(|p| &p.id == id)
    }

    /// How long ago this snapshot was retrieved
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.fetched_at)
    }
}

/// One row of the thread listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSummary {
    pub id: ResourceKey,
    pub title: String,
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub generation_in_progress: bool,
    pub post_count: usize,
}

impl From<&ThreadSnapshot> for ThreadSummary {
    fn from(snapshot: &ThreadSnapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            title: snapshot.title.clone(),
            body: snapshot.body.clone(),
            author: snapshot.author.clone(),
            created_at: snapshot.created_at,
            generation_in_progress: snapshot.generation_in_progress,
            post_count: snapshot.posts.len(),
        }
    }
}

/// Payload for opening a new thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThread {
    pub username: String,
    pub body: String,
}

/// Who is submitting a reply. Supplied by the caller, never looked up from ambient state.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub token: String,
}

impl Identity {
    #[must_use]
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}
