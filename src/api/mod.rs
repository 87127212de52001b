pub mod client;
pub mod wire;

pub use client::{HttpThreadSource, USER_AGENT_ENV, resolve_user_agent, validate_user_agent};
