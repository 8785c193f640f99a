//! Authorization Code grant (RFC 6749 section 4.1).

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use super::{
    authorization_url, basic_authorization, callback, merge_scope_and_extras,
    AuthorizationResponse, FlowCore, GrantType, OAuthFlow, STATE_LEN,
};
use crate::config::ClientConfig;
use crate::error::{OAuthError, Result};
use crate::http::{HttpTransport, Params, Request};
use crate::pkce::state_nonce;
use crate::store::SecretStore;
use crate::token::TokenSet;

/// Browser redirect flow for confidential clients.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use roci_oauth::prelude::*;
///
/// # async fn run() -> roci_oauth::Result<()> {
/// let config = ClientConfig::builder()
///     .client_id("abc")
///     .client_secret("s3cret")
///     .authorization_endpoint("https://auth.example.com/authorize")
///     .token_endpoint("https://auth.example.com/token")
///     .redirect_uri("app://cb")
///     .build();
/// let flow = AuthorizationCodeFlow::new(
///     config,
///     Arc::new(FileSecretStore::new_default()),
///     Arc::new(ReqwestTransport::new(TransportConfig::default())?),
/// )?;
/// println!("open {}", flow.authorization_url()?);
/// // ...the app later receives the redirect:
/// let tokens = flow
///     .authorization_response_handler(AuthorizationResponse::Callback(
///         "app://cb?code=XYZ&state=...".to_string(),
///     ))
///     .await?;
/// # let _ = tokens;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct AuthorizationCodeFlow {
    core: FlowCore,
    redirect_uri: String,
    state: String,
    use_basic_authorization: bool,
}

impl AuthorizationCodeFlow {
    /// Fails with [`OAuthError::Configuration`] when `redirect_uri` is unset.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        let redirect_uri = config.redirect_uri.clone().ok_or_else(|| {
            OAuthError::Configuration(
                "redirect_uri is required for the authorization code flow".to_string(),
            )
        })?;
        Ok(Self {
            core: FlowCore::new(config, store, transport)?,
            redirect_uri,
            state: state_nonce(STATE_LEN),
            use_basic_authorization: true,
        })
    }

    /// Send the client secret in the body instead of a Basic header.
    pub fn with_basic_authorization(mut self, enabled: bool) -> Self {
        self.use_basic_authorization = enabled;
        self
    }

    /// CSRF nonce echoed back by the authorization server.
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// URL the user opens to approve access.
    pub fn authorization_url(&self) -> Result<Url> {
        authorization_url(self.authorization_endpoint(), &self.authorization_params())
    }

    fn client_secret(&self) -> &str {
        self.core.config().client_secret.as_deref().unwrap_or_default()
    }
}

#[async_trait]
impl OAuthFlow for AuthorizationCodeFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FlowCore {
        &mut self.core
    }

    fn authorization_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("response_type".to_string(), "code".to_string());
        params.insert("client_id".to_string(), self.client_id().to_string());
        params.insert("state".to_string(), self.state.clone());
        params.insert("redirect_uri".to_string(), self.redirect_uri.clone());
        merge_scope_and_extras(
            &mut params,
            self.core.config(),
            &self.core.config().additional_authorization_params,
        );
        params
    }

    fn token_request_params(&self) -> Params {
        let mut params = Params::new();
        params.insert(
            "grant_type".to_string(),
            GrantType::AuthorizationCode.to_string(),
        );
        params.insert("redirect_uri".to_string(), self.redirect_uri.clone());
        params.insert("client_id".to_string(), self.client_id().to_string());
        params.insert("client_secret".to_string(), self.client_secret().to_string());
        params.extend(
            self.core
                .config()
                .additional_token_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        params
    }

    async fn authorization_response_handler(
        &self,
        response: AuthorizationResponse,
    ) -> Result<TokenSet> {
        let code = callback::authorization_code(response, &self.state)?;

        let mut params = self.token_request_params();
        params.insert("code".to_string(), code);
        // An empty secret is never sent; a real one moves to the header
        // when Basic authorization is enabled.
        let secret = params.remove("client_secret").unwrap_or_default();
        let mut basic = None;
        if !secret.is_empty() {
            if self.use_basic_authorization {
                basic = Some(basic_authorization(self.client_id(), &secret));
            } else {
                params.insert("client_secret".to_string(), secret);
            }
        }

        let mut request = Request::form_post(self.token_endpoint(), &params);
        if let Some(header) = basic {
            request.set_header("Authorization", header);
        }
        tracing::info!(client_id = %self.client_id(), "exchanging authorization code");
        self.token_request(request).await
    }
}
