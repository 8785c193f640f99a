//! Client configuration (layered: code > env > TOML file).

use std::fmt;
use std::path::Path;

use bon::Builder;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{OAuthError, Result};
use crate::http::Params;

/// Registration details of one OAuth client at one authorization server.
///
/// # Example
/// ```
/// use roci_oauth::config::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .client_id("abc")
///     .client_secret("s3cret")
///     .authorization_endpoint("https://auth.example.com/authorize")
///     .token_endpoint("https://auth.example.com/token")
///     .redirect_uri("app://cb")
///     .scope("read write")
///     .build();
/// assert_eq!(config.scopes(), vec!["read", "write"]);
/// ```
#[derive(Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[builder(into)]
    pub client_id: String,
    #[builder(into)]
    pub client_secret: Option<String>,
    #[builder(into)]
    pub authorization_endpoint: String,
    #[builder(into)]
    pub token_endpoint: String,
    #[builder(into)]
    pub redirect_uri: Option<String>,
    /// Space-delimited scope string.
    #[builder(into)]
    pub scope: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub additional_authorization_params: Params,
    #[serde(default)]
    #[builder(default)]
    pub additional_token_params: Params,
    #[serde(default)]
    #[builder(default)]
    pub additional_refresh_params: Params,
    /// Replaces the stored token type in the `Authorization` header.
    #[builder(into)]
    pub token_type_override: Option<String>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| ".."))
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .field("scope", &self.scope)
            .field(
                "additional_authorization_params",
                &self.additional_authorization_params,
            )
            .field("additional_token_params", &self.additional_token_params)
            .field("additional_refresh_params", &self.additional_refresh_params)
            .field("token_type_override", &self.token_type_override)
            .finish()
    }
}

impl ClientConfig {
    /// Parse and validate a TOML document.
    ///
    /// ```
    /// use roci_oauth::config::ClientConfig;
    ///
    /// let config = ClientConfig::from_toml_str(r#"
    ///     client_id = "abc"
    ///     authorization_endpoint = "https://auth.example.com/device"
    ///     token_endpoint = "https://auth.example.com/token"
    ///
    ///     [additional_token_params]
    ///     audience = "api"
    /// "#)?;
    /// assert_eq!(config.additional_token_params["audience"], "api");
    /// # Ok::<(), roci_oauth::OAuthError>(())
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OAuthError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `<PREFIX>_CLIENT_ID`, `<PREFIX>_CLIENT_SECRET`,
    /// `<PREFIX>_AUTHORIZATION_ENDPOINT`, `<PREFIX>_TOKEN_ENDPOINT`,
    /// `<PREFIX>_REDIRECT_URI`, `<PREFIX>_SCOPE` and `<PREFIX>_TOKEN_TYPE`.
    /// A `.env` file is read first if present.
    pub fn from_env(prefix: &str) -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            lookup(&format!("{prefix}_{suffix}")).filter(|value| !value.trim().is_empty())
        };
        let required = |suffix: &str| {
            var(suffix).ok_or_else(|| {
                OAuthError::Configuration(format!("{prefix}_{suffix} is not set"))
            })
        };

        let config = Self::builder()
            .client_id(required("CLIENT_ID")?)
            .authorization_endpoint(required("AUTHORIZATION_ENDPOINT")?)
            .token_endpoint(required("TOKEN_ENDPOINT")?)
            .maybe_client_secret(var("CLIENT_SECRET"))
            .maybe_redirect_uri(var("REDIRECT_URI"))
            .maybe_scope(var("SCOPE"))
            .maybe_token_type_override(var("TOKEN_TYPE"))
            .build();
        config.validate()?;
        Ok(config)
    }

    /// Reject an empty client id or unparseable endpoints.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(OAuthError::Configuration(
                "client_id must not be empty".to_string(),
            ));
        }
        for (name, endpoint) in [
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            Url::parse(endpoint).map_err(|e| {
                OAuthError::Configuration(format!("{name} `{endpoint}` is not a URL: {e}"))
            })?;
        }
        Ok(())
    }

    /// Individual scopes.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|scope| scope.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Key under which this client's tokens are stored.
    pub fn tokens_key(&self) -> String {
        format!("{}:tokens", self.client_id)
    }
}
