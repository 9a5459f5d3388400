//! Crate-wide error taxonomy.
//!
//! Services return these typed variants; callers match on the variant
//! instead of inspecting error strings. The aggregator in particular relies
//! on `Error::Duplicate` being the only duplicate signal.

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Fail fast when the caller's cancellation token has already fired.
pub fn ensure_live(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    /// Input violates a declared constraint (length, URL shape, required field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A create collided with an existing post URL.
    #[error("post with this URL already exists")]
    Duplicate,

    /// A read or mutation matched no row.
    #[error("post not found")]
    NotFound,

    /// The news provider rejected our API key (HTTP 401).
    #[error("invalid API key")]
    Auth,

    /// The news provider throttled us (HTTP 429).
    #[error("rate limit exceeded")]
    RateLimited,

    /// The news provider rejected the request (HTTP 400), with the decoded
    /// error body when it could be parsed.
    #[error("bad request: {code}: {message}")]
    BadRequest { code: String, message: String },

    /// The news provider reported an internal failure (HTTP 500).
    #[error("news provider unavailable")]
    ProviderUnavailable,

    /// HTTP 200 but the envelope carried a non-"ok" status.
    #[error("provider reported error status: {0}")]
    ProviderStatus(String),

    /// The response body could not be decoded as the expected JSON.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// A provider HTTP status outside the mapped set.
    #[error("unexpected HTTP status: {0}")]
    UnexpectedStatus(u16),

    /// The caller's cancellation token fired or a deadline elapsed.
    #[error("operation cancelled")]
    Cancelled,

    /// Transport-level failure reaching the provider.
    #[error("http request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Database infrastructure failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Cache infrastructure failure.
    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}
