use derive_more::From;

use crate::sync::SyncError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Http(reqwest::Error),

    #[from]
    HttpHeader(reqwest::header::InvalidHeaderValue),

    #[from]
    Sync(SyncError),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Json(e) => write!(fmt, "invalid JSON: {e}"),
            Self::Http(e) => write!(fmt, "HTTP client error: {e}"),
            Self::HttpHeader(e) => write!(fmt, "invalid header value: {e}"),
            Self::Sync(e) => write!(fmt, "{e}"),
            Self::Custom(msg) => write!(fmt, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_errors_display_unwrapped() {
        let err = Error::from(SyncError::NotBound);
        assert_eq!(err.to_string(), SyncError::NotBound.to_string());
    }

    #[test]
    fn test_invalid_header_converts() {
        let err: Error = reqwest::header::HeaderValue::from_str("bad\nvalue").unwrap_err().into();
        assert!(err.to_string().starts_with("invalid header value"));
    }
}
