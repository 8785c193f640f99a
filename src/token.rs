//! Access/refresh token bundle and its persisted form.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OAuthError, Result};

/// Refresh-token value meaning "the server issued none".
pub const NO_REFRESH_TOKEN: &str = "null";

pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Tokens are refreshed this many seconds before they expire.
pub const REFRESH_MARGIN_SECS: i64 = 30;

/// Credentials returned by a token endpoint.
///
/// # Example
/// ```
/// use roci_oauth::token::TokenSet;
///
/// let tokens = TokenSet::from_response_body(
///     br#"{"access_token":"abc","refresh_token":"def","expires_in":600}"#,
/// )?;
/// assert_eq!(tokens.token_type, "Bearer");
/// assert!(tokens.is_refreshable());
/// # Ok::<(), roci_oauth::OAuthError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default = "default_refresh_token")]
    pub refresh_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    /// When the set was saved locally; not part of the server payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// Parse a token-endpoint JSON body, applying RFC 6749 defaults.
    pub fn from_response_body(body: &[u8]) -> Result<Self> {
        let payload: Value = serde_json::from_slice(body)?;
        Self::from_response_value(&payload)
    }

    pub fn from_response_value(payload: &Value) -> Result<Self> {
        let access_token = match payload.get("access_token") {
            Some(Value::String(token)) if !token.is_empty() => token.clone(),
            _ => return Err(OAuthError::InvalidAccessToken),
        };
        let token_type = payload
            .get("token_type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TOKEN_TYPE)
            .to_string();
        let refresh_token = match payload.get("refresh_token") {
            None | Some(Value::Null) => NO_REFRESH_TOKEN.to_string(),
            Some(Value::String(token)) => token.clone(),
            Some(_) => return Err(OAuthError::InvalidRefreshTokenType),
        };
        Ok(Self {
            access_token,
            token_type,
            refresh_token,
            expires_in: parse_expires_in(payload.get("expires_in")),
            issued_at: None,
        })
    }

    pub fn is_refreshable(&self) -> bool {
        self.refresh_token != NO_REFRESH_TOKEN
    }

    /// Seconds since the set was issued. Unknown issuance counts as brand new.
    pub fn age_secs_at(&self, now: DateTime<Utc>) -> i64 {
        self.issued_at
            .map(|issued| (now - issued).num_seconds())
            .unwrap_or(0)
    }

    /// Whether the set is within [`REFRESH_MARGIN_SECS`] of expiry.
    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        self.is_refreshable()
            && self.age_secs_at(now) >= self.lifetime_secs().saturating_sub(REFRESH_MARGIN_SECS)
    }

    /// `None` when issuance is unknown or the expiry is past the last
    /// representable date.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = TimeDelta::try_seconds(self.lifetime_secs())?;
        self.issued_at?.checked_add_signed(lifetime)
    }

    // Saturates: servers can send values beyond `i64`.
    fn lifetime_secs(&self) -> i64 {
        i64::try_from(self.expires_in).unwrap_or(i64::MAX)
    }

    /// Encode for the secret store.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// Some servers send `expires_in` as a string.
fn parse_expires_in(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_EXPIRES_IN),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN),
        _ => DEFAULT_EXPIRES_IN,
    }
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

fn default_refresh_token() -> String {
    NO_REFRESH_TOKEN.to_string()
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}
