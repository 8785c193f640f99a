//! Error types for roci-oauth.

use thiserror::Error;

/// Every failure an OAuth flow can surface.
///
/// Callback, state and credential problems get their own variants so
/// callers can match on them directly. Transport and serialization
/// failures are normalized to strings the same way across backends.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Authorization callback is missing `code` or `state`")]
    AuthCallbackInvalid,

    #[error("Authorization callback state does not match the issued state")]
    StateIncorrect,

    #[error("Authorization server reported an error: {0}")]
    AuthorizationError(String),

    #[error("Token response has no valid access token")]
    InvalidAccessToken,

    #[error("No access token stored")]
    NoAccessToken,

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token has an invalid type")]
    InvalidRefreshTokenType,

    #[error("Invalid device authorization response: {0}")]
    ResponseInvalid(String),

    #[error("Authorization request denied")]
    Denied,

    #[error("Device code expired")]
    DeviceCodeExpired,

    #[error("Expected a callback URL for this flow")]
    ResponseNotUrl,

    #[error("Expected a device authorization session for this flow")]
    ResponseNotDeviceFlowAuthResponse,

    #[error("HTTP error (status {status}): {body}")]
    Http {
        status: u16,
        body: String,
        /// RFC 6749 `error` member, when the body carried one.
        error: Option<String>,
    },

    #[error("Form body could not be encoded or decoded: {0}")]
    HttpFormParsingFailure(String),

    #[error("Polling gave up after {elapsed_secs}s")]
    PollingTooLong { elapsed_secs: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Secret store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl OAuthError {
    /// The RFC 6749 error code carried by an HTTP error, if any.
    pub fn oauth_error_code(&self) -> Option<&str> {
        match self {
            Self::Http { error, .. } => error.as_deref(),
            _ => None,
        }
    }

    /// Whether the request never got an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Whether this is an HTTP error with the given status.
    pub fn is_http_status(&self, code: u16) -> bool {
        matches!(self, Self::Http { status, .. } if *status == code)
    }
}

impl From<reqwest::Error> for OAuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for OAuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Store(error.to_string())
    }
}

impl From<serde_json::Error> for OAuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for OAuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<toml::ser::Error> for OAuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, OAuthError>;
