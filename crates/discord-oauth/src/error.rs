//! Error types for the Discord OAuth2 lifecycle

/// Errors from authorization, token and resource operations.
///
/// A provider-reported callback error (user denied consent) is not an error
/// here; it comes back as [`crate::Callback::Failed`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("invalid callback request: {0}")]
    InvalidRequest(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("rate limited, retry after {retry_after}s (global: {global})")]
    RateLimited { retry_after: f64, global: bool },

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token storage error: {0}")]
    Storage(String),
}

/// Result alias for Discord OAuth operations.
pub type Result<T> = std::result::Result<T, Error>;
