// HTTP implementation of the thread source, with custom user-agent support
use super::wire::{
    WireNewThread, WireReply, classify_status, decode_created, decode_listing, decode_thread,
};
use crate::error::{Error, Result as TsResult};
use crate::sync::{NewThread, ReplyRequest, ResourceKey, SyncError, ThreadSnapshot, ThreadSource, ThreadSummary};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderValue;
use reqwest::{Client, Response};
use tracing::debug;

/// Environment variable that overrides the user agent
pub const USER_AGENT_ENV: &str = "THREADSYNC_USER_AGENT";

/// Check that `user_agent` can be sent as a header value
///
/// # Errors
///
/// Will return `Err` if the string contains characters not allowed in a header
pub fn validate_user_agent(user_agent: &str) -> TsResult<HeaderValue> {
    Ok(HeaderValue::from_str(user_agent)?)
}

/// User agent to send: explicit value, then the environment, then the crate default
#[must_use]
pub fn resolve_user_agent(custom_user_agent: Option<&str>) -> String {
    custom_user_agent
        .map(str::to_string)
        .or_else(|| std::env::var(USER_AGENT_ENV).ok().filter(|ua| !ua.trim().is_empty()))
        .unwrap_or_else(|| crate::USER_AGENT.to_string())
}

#[derive(Debug, Clone)]
pub struct HttpThreadSource {
    base_url: String,
    client: Client,
}

impl HttpThreadSource {
    /// Create a client for the forum API rooted at `base_url`
    ///
    /// # Errors
    ///
    /// Will return `Err` if `base_url` is not an http(s) URL, the user agent is not a valid
    /// header or the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, custom_user_agent: Option<&str>) -> TsResult<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Custom(format!(
                "base URL must start with http:// or https://, got {base_url:?}"
            )));
        }

        let user_agent = validate_user_agent(&resolve_user_agent(custom_user_agent))?;
        let client = Client::builder().user_agent(user_agent).build()?;

        Ok(Self { base_url, client })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn thread_url(&self, key: &ResourceKey) -> String {
        format!("{}/threads/{}/", self.base_url, key)
    }

    #[must_use]
    pub fn reply_url(&self, key: &ResourceKey) -> String {
        format!("{}/threads/{}/reply/", self.base_url, key)
    }

    async fn read_success(key: Option<&ResourceKey>, response: Response) -> Result<Vec<u8>, SyncError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(key, status, &body));
        }

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(transport_error)
    }
}

fn transport_error(e: reqwest::Error) -> SyncError {
    if e.is_decode() {
        SyncError::Decode(e.to_string())
    } else {
        SyncError::Network(e.to_string())
    }
}

#[async_trait]
impl ThreadSource for HttpThreadSource {
    async fn fetch_thread(&self, key: &ResourceKey) -> Result<ThreadSnapshot, SyncError> {
        let url = self.thread_url(key);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let bytes = Self::read_success(Some(key), response).await?;
        decode_thread(&bytes, Utc::now())
    }

    async fn submit_reply(&self, key: &ResourceKey, reply: &ReplyRequest) -> Result<(), SyncError> {
        let url = self.reply_url(key);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&reply.identity.token)
            .json(&WireReply {
                content: &reply.body,
                username: &reply.identity.username,
            })
            .send()
            .await
            .map_err(transport_error)?;
        Self::read_success(Some(key), response).await.map(|_| ())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, SyncError> {
        let url = format!("{}/threads/", self.base_url);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let bytes = Self::read_success(None, response).await?;
        decode_listing(&bytes)
    }

    async fn create_thread(&self, thread: &NewThread) -> Result<ResourceKey, SyncError> {
        if thread.body.trim().is_empty() || thread.username.trim().is_empty() {
            return Err(SyncError::Validation("username and content are required".to_string()));
        }
        let url = format!("{}/create/", self.base_url);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(&WireNewThread {
                username: &thread.username,
                content: &thread.body,
            })
            .send()
            .await
            .map_err(transport_error)?;
        let bytes = Self::read_success(None, response).await?;
        decode_created(&bytes)
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
