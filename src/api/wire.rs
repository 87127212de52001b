/**
 * JSON shapes of the forum API and their translation into sync types
 */
use crate::sync::{Post, ResourceKey, SyncError, ThreadSnapshot, ThreadSummary};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Longest server message carried into an error
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(u64),
    Text(String),
}

impl From<WireId> for ResourceKey {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Number(n) => Self::from(n),
            WireId::Text(s) => Self::from(s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePost {
    pub id: WireId,
    #[serde(alias = "body")]
    pub content: String,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "author")]
    pub author_name: String,
    #[serde(default, alias = "authorAvatar")]
    pub author_avatar: Option<String>,
    #[serde(default, alias = "isGenerated")]
    pub is_ai: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireThread {
    pub id: WireId,
    pub title: String,
    #[serde(alias = "body")]
    pub content: String,
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(alias = "author")]
    pub author_name: String,
    #[serde(default, alias = "authorAvatar")]
    pub author_avatar: Option<String>,
    #[serde(default)]
    pub posts: Vec<WirePost>,
    #[serde(default, alias = "generationInProgress")]
    pub ai_generating: bool,
}

impl WirePost {
    fn into_post(self) -> Post {
        Post {
            id: self.id.into(),
            body: self.content,
            author: self.author_name,
            author_avatar: self.author_avatar,
            created_at: self.created_at,
            is_generated: self.is_ai,
        }
    }
}

impl WireThread {
    #[must_use]
    pub fn into_snapshot(self, fetched_at: DateTime<Utc>) -> ThreadSnapshot {
        ThreadSnapshot {
            id: self.id.into(),
            title: self.title,
            body: self.content,
            author: self.author_name,
            author_avatar: self.author_avatar,
            created_at: self.created_at,
            posts: self.posts.into_iter().map(WirePost::into_post).collect(),
            generation_in_progress: self.ai_generating,
            fetched_at,
        }
    }

    #[must_use]
    pub fn into_summary(self) -> ThreadSummary {
        ThreadSummary {
            id: self.id.into(),
            title: self.title,
            body: self.content,
            author: self.author_name,
            created_at: self.created_at,
            generation_in_progress: self.ai_generating,
            post_count: self.posts.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireReply<'a> {
    pub content: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Serialize)]
pub struct WireNewThread<'a> {
    pub username: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct WireCreated {
    #[serde(default)]
    pub message: Option<String>,
    pub thread_id: WireId,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: String,
}

/// Decode a thread document
///
/// # Errors
///
/// `Decode` if the payload is not a thread document.
pub fn decode_thread(bytes: &[u8], fetched_at: DateTime<Utc>) -> Result<ThreadSnapshot, SyncError> {
    serde_json::from_slice::<WireThread>(bytes)
        .map(|thread| thread.into_snapshot(fetched_at))
        .map_err(|e| SyncError::Decode(e.to_string()))
}

/// Decode the thread listing
///
/// # Errors
///
/// `Decode` if the payload is not an array of thread documents.
pub fn decode_listing(bytes: &[u8]) -> Result<Vec<ThreadSummary>, SyncError> {
    serde_json::from_slice::<Vec<WireThread>>(bytes)
        .map(|threads| threads.into_iter().map(WireThread::into_summary).collect())
        .map_err(|e| SyncError::Decode(e.to_string()))
}

/// Decode the answer to a thread creation
///
/// # Errors
///
/// `Decode` if the payload carries no thread id.
pub fn decode_created(bytes: &[u8]) -> Result<ResourceKey, SyncError> {
    serde_json::from_slice::<WireCreated>(bytes)
        .map(|created| created.thread_id.into())
        .map_err(|e| SyncError::Decode(e.to_string()))
}

/// Human readable message from an error response, preferring the `{error}` field
#[must_use]
pub fn error_message(body: &str) -> String {
    let message = serde_json::from_str::<WireErrorBody>(body)
        .map_or_else(|_| body.trim().to_string(), |e| e.error);
    message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

/// Map a non-success response onto the error taxonomy
#[must_use]
pub fn classify_status(key: Option<&ResourceKey>, status: StatusCode, body: &str) -> SyncError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthenticated(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::Validation(message),
        StatusCode::NOT_FOUND => match key {
            Some(key) => SyncError::NotFound(key.clone()),
            None => SyncError::Network(format!("HTTP {status}: {message}")),
        },
        _ => SyncError::Network(format!("HTTP {status}: {message}")),
    }
}
