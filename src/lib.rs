pub mod api;
pub mod error;
pub mod sync;

/// Default user agent for `threadsync` - automatically uses the package version
///
/// Can be overridden via the `THREADSYNC_USER_AGENT` environment variable.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
