//! Error types for the authentication layer.

use std::path::PathBuf;

/// Errors raised while obtaining or persisting OAuth tokens.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required configuration field is empty. The user must fix the
    /// configuration before retrying.
    #[error("missing required configuration value '{0}' (set it in secrets.toml or the environment)")]
    ConfigMissing(&'static str),

    /// The token endpoint could not be reached (DNS, connect, timeout).
    #[error("could not reach the token endpoint: {0}")]
    Transport(#[source] reqwest::Error),

    /// The token endpoint answered with a non-200 status.
    #[error("token request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    /// The token endpoint answered 200 but the body breaks the token contract.
    #[error("token endpoint returned a malformed response: {0}")]
    MalformedResponse(String),

    /// A successful exchange left no refresh token to persist.
    #[error("no refresh token available after a successful exchange; refusing to persist an unrenewable token")]
    MissingRefreshToken,

    /// Persisting the token record failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reading the authorization code from the user failed.
    #[error("failed to read authorization code: {0}")]
    Prompt(#[source] std::io::Error),

    /// The user supplied no authorization code.
    #[error("no authorization code was provided")]
    EmptyAuthorizationCode,

    /// The configured consent page base is not a valid URL.
    #[error("invalid consent URL '{url}': {reason}")]
    InvalidConsentUrl { url: String, reason: String },
}

impl AuthError {
    /// Whether re-running the interactive authorization is the way out.
    ///
    /// Refresh failures land here: a rejected refresh token usually means it
    /// was revoked, and a transport failure may hide the same problem.
    pub fn suggests_reauthorization(&self) -> bool {
        matches!(
            self,
            AuthError::Transport(_) | AuthError::RequestFailed { .. }
        )
    }
}

/// Errors raised by the file-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what}: {message}")]
    Serialize { what: &'static str, message: String },

    /// The stored file exists but cannot be used. Only ever logged by loaders
    /// and recovered by treating the store as empty.
    #[error("stored file {} is corrupt: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
