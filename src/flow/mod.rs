//! OAuth grant flows and the operations they share.
//!
//! Every flow implements [`OAuthFlow`]. A flow only supplies its own
//! parameter construction and response handling; token exchange,
//! persistence, refresh and authenticated requests come from the trait's
//! provided methods, which operate on the flow's [`FlowCore`].

pub mod authorization_code;
mod callback;
pub mod device;
pub mod pkce;

pub use authorization_code::AuthorizationCodeFlow;
pub use device::{DeviceAuthorizationFlow, DeviceAuthorizationSession, DevicePollState};
pub use pkce::PkceFlow;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use reqwest::Url;
use strum::{Display, EnumString};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::ClientConfig;
use crate::error::{OAuthError, Result};
use crate::http::{HttpTransport, Params, Request, Response};
use crate::store::SecretStore;
use crate::token::TokenSet;
use crate::util::retry::RetryPolicy;

/// Length of the CSRF `state` nonce issued by redirect flows.
pub(crate) const STATE_LEN: usize = 8;

/// Pause before the first repeat of an authenticated request; doubles after.
pub const AUTHENTICATED_RETRY_BACKOFF: Duration = Duration::from_millis(250);
/// Ceiling for the pause between authenticated request attempts.
pub const AUTHENTICATED_RETRY_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Evidence handed back to a flow once the user has acted.
#[derive(Debug, Clone)]
pub enum AuthorizationResponse {
    /// Redirect URL received by the app (authorization code and PKCE).
    Callback(String),
    /// Session returned by [`DeviceAuthorizationFlow::device_flow_authorization_request`].
    Device(DeviceAuthorizationSession),
}

/// OAuth `grant_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum GrantType {
    #[strum(serialize = "authorization_code")]
    AuthorizationCode,
    #[strum(serialize = "refresh_token")]
    RefreshToken,
    #[strum(serialize = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
}

/// State shared by every flow: configuration, secret store, transport and
/// the refresh guard.
pub struct FlowCore {
    config: ClientConfig,
    store: Arc<dyn SecretStore>,
    transport: Arc<dyn HttpTransport>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for FlowCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowCore")
            .field("config", &self.config)
            .field("store", &"..")
            .field("transport", &"..")
            .finish()
    }
}

impl FlowCore {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            transport,
            refresh_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SecretStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn set_scope(&mut self, scope: Option<String>) {
        self.config.scope = scope;
    }

    pub fn additional_authorization_params_mut(&mut self) -> &mut Params {
        &mut self.config.additional_authorization_params
    }

    pub fn additional_token_params_mut(&mut self) -> &mut Params {
        &mut self.config.additional_token_params
    }

    pub fn additional_refresh_params_mut(&mut self) -> &mut Params {
        &mut self.config.additional_refresh_params
    }

    pub(crate) async fn send(&self, request: &Request) -> Result<Response> {
        self.transport.send(request.to_http()?).await
    }

    /// Decode the stored set. A set saved without `issued_at` takes the
    /// store's write time instead.
    pub fn load_tokens(&self) -> Result<Option<TokenSet>> {
        let Some(stored) = self.store.get(&self.config.tokens_key())? else {
            return Ok(None);
        };
        let mut tokens = TokenSet::decode(&stored.value)?;
        if tokens.issued_at.is_none() {
            tokens.issued_at = Some(stored.created_at);
        }
        Ok(Some(tokens))
    }

    pub(crate) fn save_tokens(&self, mut tokens: TokenSet) -> Result<TokenSet> {
        tokens.issued_at = Some(Utc::now());
        self.store.set(&self.config.tokens_key(), &tokens.encode()?)?;
        tracing::debug!(
            client_id = %self.config.client_id,
            expires_in = tokens.expires_in,
            refreshable = tokens.is_refreshable(),
            "saved token set"
        );
        Ok(tokens)
    }

    /// One token-endpoint exchange: send, parse, persist.
    ///
    /// A 2xx body that carries `error` and no `access_token` is treated
    /// as an error response.
    pub(crate) async fn exchange_tokens(&self, request: &Request) -> Result<TokenSet> {
        let response = self.send(request).await?;
        if !response.is_success() {
            return Err(response.into_http_error());
        }
        let payload = response.json_value()?;
        if payload.get("access_token").is_none() && payload.get("error").is_some() {
            return Err(response.into_http_error());
        }
        let tokens = TokenSet::from_response_value(&payload)?;
        self.save_tokens(tokens)
    }

    async fn lock_refresh(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }
}

/// Operations common to every grant flow.
///
/// Implementors supply parameter construction and the response handler;
/// everything else is provided.
#[async_trait]
pub trait OAuthFlow: Send + Sync {
    fn core(&self) -> &FlowCore;

    fn core_mut(&mut self) -> &mut FlowCore;

    /// Parameters for the authorization request.
    fn authorization_params(&self) -> Params;

    /// Parameters for the token request.
    fn token_request_params(&self) -> Params;

    /// Turn the user's authorization evidence into a persisted token set.
    async fn authorization_response_handler(
        &self,
        response: AuthorizationResponse,
    ) -> Result<TokenSet>;

    fn client_id(&self) -> &str {
        &self.core().config().client_id
    }

    /// Handle to the secret store holding this client's tokens.
    fn secret_store(&self) -> &Arc<dyn SecretStore> {
        self.core().store()
    }

    fn scopes(&self) -> Option<&str> {
        self.core().config().scope.as_deref()
    }

    fn authorization_endpoint(&self) -> &str {
        &self.core().config().authorization_endpoint
    }

    fn token_endpoint(&self) -> &str {
        &self.core().config().token_endpoint
    }

    /// Extra parameters merged into every refresh body.
    fn refresh_params(&self) -> &Params {
        &self.core().config().additional_refresh_params
    }

    fn token_type_override(&self) -> Option<&str> {
        self.core().config().token_type_override.as_deref()
    }

    fn tokens_key(&self) -> String {
        self.core().config().tokens_key()
    }

    /// Whether tokens are stored for this client.
    fn is_authorized(&self) -> Result<bool> {
        self.secret_store().contains(&self.tokens_key())
    }

    fn load_tokens(&self) -> Result<Option<TokenSet>> {
        self.core().load_tokens()
    }

    /// Forget the stored tokens.
    fn sign_out(&self) -> Result<()> {
        tracing::info!(client_id = %self.client_id(), "removing stored tokens");
        self.secret_store().remove(&self.tokens_key())
    }

    /// POST to the token endpoint and persist the result, retrying once.
    async fn token_request(&self, request: Request) -> Result<TokenSet> {
        let core = self.core();
        let request = &request;
        RetryPolicy::attempts(2)
            .execute(move || core.exchange_tokens(request))
            .await
    }

    /// Refresh `tokens` if they are refreshable and within 30 seconds of
    /// expiring; otherwise return them unchanged.
    ///
    /// Refreshes are serialized per flow. A caller that waited on another
    /// caller's refresh picks up the stored result instead of refreshing
    /// again.
    async fn check_refresh_token(&self, tokens: TokenSet) -> Result<TokenSet> {
        if !tokens.needs_refresh_at(Utc::now()) {
            return Ok(tokens);
        }
        let _guard = self.core().lock_refresh().await;
        let latest = self.load_tokens()?.unwrap_or_else(|| tokens.clone());
        if latest.access_token != tokens.access_token && !latest.needs_refresh_at(Utc::now()) {
            tracing::debug!(client_id = %self.client_id(), "token already refreshed");
            return Ok(latest);
        }
        self.refresh_token(&latest).await
    }

    /// Exchange the refresh token for a new set, replacing the stored one.
    async fn refresh_token(&self, tokens: &TokenSet) -> Result<TokenSet> {
        if !tokens.is_refreshable() {
            return Err(OAuthError::NoRefreshToken);
        }
        let mut params = Params::new();
        params.insert("refresh_token".to_string(), tokens.refresh_token.clone());
        params.insert("grant_type".to_string(), GrantType::RefreshToken.to_string());
        params.extend(
            self.refresh_params()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let mut request = Request::form_post(self.token_endpoint(), &params);
        let token_params = self.token_request_params();
        if let Some(secret) = token_params
            .get("client_secret")
            .filter(|secret| !secret.is_empty())
        {
            if !self.refresh_params().contains_key("client_secret") {
                request.set_header(
                    "Authorization",
                    basic_authorization(self.client_id(), secret),
                );
            }
        }

        tracing::info!(client_id = %self.client_id(), "refreshing access token");
        self.token_request(request).await
    }

    /// Send `request` with the stored bearer credential, refreshing first
    /// if needed. The whole attempt is repeated up to `retries` more times
    /// with exponential backoff between attempts.
    async fn authenticated_request(&self, request: Request, retries: u32) -> Result<Response> {
        let request = &request;
        RetryPolicy::with_retries(retries)
            .with_backoff(AUTHENTICATED_RETRY_BACKOFF, AUTHENTICATED_RETRY_MAX_BACKOFF)
            .execute(move || authenticated_attempt(self, request))
            .await
    }
}

async fn authenticated_attempt<F>(flow: &F, request: &Request) -> Result<Response>
where
    F: OAuthFlow + ?Sized,
{
    let tokens = flow.load_tokens()?.ok_or(OAuthError::NoAccessToken)?;
    let tokens = flow.check_refresh_token(tokens).await?;
    let scheme = flow
        .token_type_override()
        .unwrap_or(tokens.token_type.as_str());

    let mut request = request.clone();
    request.set_header(
        "Authorization",
        format!("{scheme} {}", tokens.access_token),
    );
    flow.core().send(&request).await?.error_for_status()
}

/// `Basic base64(client_id:client_secret)`.
pub(crate) fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{client_id}:{client_secret}"))
    )
}

/// The authorization endpoint with `params` appended to its query.
pub(crate) fn authorization_url(endpoint: &str, params: &Params) -> Result<Url> {
    let mut url = Url::parse(endpoint).map_err(|e| {
        OAuthError::Configuration(format!("invalid authorization endpoint `{endpoint}`: {e}"))
    })?;
    url.query_pairs_mut()
        .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    Ok(url)
}

/// `scope` plus the additive parameters, merged into `params`.
pub(crate) fn merge_scope_and_extras(params: &mut Params, config: &ClientConfig, extras: &Params) {
    if let Some(scope) = config.scope.as_deref().filter(|s| !s.is_empty()) {
        params.insert("scope".to_string(), scope.to_string());
    }
    params.extend(extras.iter().map(|(k, v)| (k.clone(), v.clone())));
}
