//! Error types for the loopback authorization flow

use std::time::Duration;

/// Errors from acquiring, caching, and using an OAuth credential.
///
/// `Persistence` and `CredentialParse` are never returned by
/// `AuthorizationFlow::obtain_credential`: the flow logs them and carries on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("failed to bind loopback listener: {0}")]
    Bind(String),

    #[error("timed out after {}s waiting for the authorization code", .0.as_secs())]
    Timeout(Duration),

    #[error("authorization cancelled before a code was received")]
    Cancelled,

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("failed to persist credential: {0}")]
    Persistence(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
