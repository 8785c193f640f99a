//! Authorization Code grant with PKCE (RFC 7636) for public clients.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;

use super::{
    authorization_url, callback, merge_scope_and_extras, AuthorizationResponse, FlowCore,
    GrantType, OAuthFlow, STATE_LEN,
};
use crate::config::ClientConfig;
use crate::error::{OAuthError, Result};
use crate::http::{HttpTransport, Params, Request};
use crate::pkce::{state_nonce, PkceChallenge};
use crate::store::SecretStore;
use crate::token::TokenSet;

/// Redirect flow proving possession of a per-instance code verifier
/// instead of a client secret.
#[derive(Debug)]
pub struct PkceFlow {
    core: FlowCore,
    redirect_uri: String,
    state: String,
    pkce: PkceChallenge,
}

impl PkceFlow {
    /// Fails with [`OAuthError::Configuration`] when `redirect_uri` is unset.
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        Self::with_challenge(config, store, transport, PkceChallenge::generate())
    }

    pub(crate) fn with_challenge(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
        pkce: PkceChallenge,
    ) -> Result<Self> {
        let redirect_uri = config.redirect_uri.clone().ok_or_else(|| {
            OAuthError::Configuration("redirect_uri is required for the PKCE flow".to_string())
        })?;
        Ok(Self {
            core: FlowCore::new(config, store, transport)?,
            redirect_uri,
            state: state_nonce(STATE_LEN),
            pkce,
        })
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// `base64url(SHA-256(verifier))`, sent with the authorization request.
    pub fn code_challenge(&self) -> &str {
        self.pkce.challenge()
    }

    /// Whether the verifier came from the degraded fallback generator.
    pub fn uses_fallback_verifier(&self) -> bool {
        self.pkce.is_fallback()
    }

    pub fn authorization_url(&self) -> Result<Url> {
        authorization_url(self.authorization_endpoint(), &self.authorization_params())
    }
}

#[async_trait]
impl OAuthFlow for PkceFlow {
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
        params.insert(
            "code_challenge".to_string(),
            self.pkce.challenge().to_string(),
        );
        params.insert(
            "code_challenge_method".to_string(),
            self.pkce.method().to_string(),
        );
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
        params.insert(
            "code_verifier".to_string(),
            self.pkce.verifier().to_string(),
        );
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
        tracing::info!(
            client_id = %self.client_id(),
            "exchanging authorization code with PKCE verifier"
        );
        self.token_request(Request::form_post(self.token_endpoint(), &params))
            .await
    }
}
