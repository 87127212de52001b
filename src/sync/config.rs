/**
 * Configuration constants for the thread sync client
 */
use std::time::Duration;

/// Delay between polls while the server is generating a reply
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// A fetch that takes longer than this counts as a network error
pub const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 10;

/// Longest reply body accepted before it is sent
pub const DEFAULT_MAX_REPLY_CHARS: usize = 10_000;

/// Upper bound for exponential retry delays
pub const DEFAULT_MAX_BACKOFF_SECONDS: u64 = 60;

/// Where the forum API lives when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Channel buffer size for poller re-evaluation hints
pub const POLLER_CHANNEL_CAPACITY: usize = 16;

/// How long to wait between polls after a transient error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Same interval as a normal tick
    #[default]
    Flat,
    /// Double the delay for every consecutive transient error, capped at `max`
    Exponential { max: Duration },
}

impl RetryPolicy {
    /// Delay before the next tick after `consecutive_errors` transient failures in a row
    #[must_use]
    pub fn delay(&self, interval: Duration, consecutive_errors: u32) -> Duration {
        match *self {
            Self::Flat => interval,
            Self::Exponential { max } => {
                if consecutive_errors == 0 {
                    return interval;
                }
                let factor = 2_u32.saturating_pow(consecutive_errors.min(16));
                interval.saturating_mul(factor).min(max.max(interval))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    pub max_reply_chars: usize,
    pub retry: RetryPolicy,
    /// Keep at most this many threads in the cache, `None` for no limit
    pub cache_capacity: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECONDS),
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
            retry: RetryPolicy::Flat,
            cache_capacity: None,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_max_reply_chars(mut self, max: usize) -> Self {
        self.max_reply_chars = max;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(DEFAULT_POLL_INTERVAL_MS > 0, "DEFAULT_POLL_INTERVAL_MS must be greater than 0");
    assert!(DEFAULT_FETCH_TIMEOUT_SECONDS > 0, "DEFAULT_FETCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(DEFAULT_MAX_REPLY_CHARS > 0, "DEFAULT_MAX_REPLY_CHARS must be greater than 0");
    assert!(DEFAULT_MAX_BACKOFF_SECONDS > 0, "DEFAULT_MAX_BACKOFF_SECONDS must be greater than 0");
    assert!(POLLER_CHANNEL_CAPACITY > 0, "POLLER_CHANNEL_CAPACITY must be greater than 0");
};
