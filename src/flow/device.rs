//! Device Authorization grant (RFC 8628).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use strum::Display;
use tokio::time::Instant;

use super::{merge_scope_and_extras, AuthorizationResponse, FlowCore, GrantType, OAuthFlow};
use crate::config::ClientConfig;
use crate::error::{OAuthError, Result};
use crate::http::{HttpTransport, Params, Request};
use crate::store::SecretStore;
use crate::token::TokenSet;
use crate::util::poll::{PollDecision, PollPolicy};
use crate::util::retry::RetryPolicy;

/// Poll interval used when the server does not send one.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;
/// Smaller intervals, including zero, are raised to this.
pub const MIN_INTERVAL_SECS: u64 = 1;
/// Added to the interval on every `slow_down`.
pub const SLOW_DOWN_STEP_SECS: u64 = 5;
/// Polling gives up after this long.
pub const MAX_POLLING_SECS: u64 = 900;
/// A session counts as expired this many seconds early.
pub const EXPIRY_SKEW_SECS: i64 = 5;

/// Server response to the device authorization request.
#[derive(Clone)]
pub struct DeviceAuthorizationSession {
    device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: Option<String>,
    /// Seconds between polls.
    pub interval: u64,
    /// Lifetime of the device code in seconds.
    pub expires_in: u64,
    pub created_at: DateTime<Utc>,
    requested_at: Instant,
}

impl std::fmt::Debug for DeviceAuthorizationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceAuthorizationSession")
            .field("device_code", &"..")
            .field("user_code", &self.user_code)
            .field("verification_uri", &self.verification_uri)
            .field("verification_uri_complete", &self.verification_uri_complete)
            .field("interval", &self.interval)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl DeviceAuthorizationSession {
    /// Parse a device authorization response. `verification_url` is
    /// accepted as an alias of `verification_uri`.
    pub fn from_response(payload: &Value) -> Result<Self> {
        let text = |key: &str| payload.get(key).and_then(Value::as_str).map(str::to_string);
        let require = |key: &str| {
            text(key).ok_or_else(|| OAuthError::ResponseInvalid(format!("missing `{key}`")))
        };

        let device_code = require("device_code")?;
        let user_code = require("user_code")?;
        let verification_uri = text("verification_uri")
            .or_else(|| text("verification_url"))
            .ok_or_else(|| OAuthError::ResponseInvalid("missing `verification_uri`".to_string()))?;
        let expires_in = seconds(payload.get("expires_in"))
            .ok_or_else(|| OAuthError::ResponseInvalid("missing `expires_in`".to_string()))?;
        let interval = seconds(payload.get("interval"))
            .unwrap_or(DEFAULT_INTERVAL_SECS)
            .max(MIN_INTERVAL_SECS);

        Ok(Self {
            device_code,
            user_code,
            verification_uri,
            verification_uri_complete: text("verification_uri_complete"),
            interval,
            expires_in,
            created_at: Utc::now(),
            requested_at: Instant::now(),
        })
    }

    /// `None` when the lifetime reaches past the last representable date.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let lifetime = i64::try_from(self.expires_in).unwrap_or(i64::MAX);
        self.created_at.checked_add_signed(TimeDelta::try_seconds(lifetime)?)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// True from five seconds before the server-side expiry onwards.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .is_some_and(|expires_at| now + TimeDelta::seconds(EXPIRY_SKEW_SECS) >= expires_at)
    }
}

fn seconds(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Where a device flow is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DevicePollState {
    Idle,
    Requested,
    Polling,
    Authorized,
    Denied,
    Expired,
    TimedOut,
    Failed,
}

/// Device flow for input-constrained clients.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use roci_oauth::prelude::*;
///
/// # async fn run() -> roci_oauth::Result<()> {
/// let config = ClientConfig::builder()
///     .client_id("abc")
///     .authorization_endpoint("https://auth.example.com/device/code")
///     .token_endpoint("https://auth.example.com/token")
///     .build();
/// let flow = DeviceAuthorizationFlow::new(
///     config,
///     Arc::new(FileSecretStore::new_default()),
///     Arc::new(ReqwestTransport::new(TransportConfig::default())?),
/// )?;
/// let session = flow.device_flow_authorization_request().await?;
/// println!("Visit {} and enter {}", session.verification_uri, session.user_code);
/// let tokens = flow
///     .authorization_response_handler(AuthorizationResponse::Device(session))
///     .await?;
/// # let _ = tokens;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DeviceAuthorizationFlow {
    core: FlowCore,
    session: Mutex<Option<DeviceAuthorizationSession>>,
    state: Mutex<DevicePollState>,
    max_polling: Duration,
}

impl DeviceAuthorizationFlow {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn SecretStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self> {
        Ok(Self {
            core: FlowCore::new(config, store, transport)?,
            session: Mutex::new(None),
            state: Mutex::new(DevicePollState::Idle),
            max_polling: Duration::from_secs(MAX_POLLING_SECS),
        })
    }

    /// Override the overall polling bound.
    pub fn with_max_polling(mut self, max_polling: Duration) -> Self {
        self.max_polling = max_polling;
        self
    }

    pub fn poll_state(&self) -> DevicePollState {
        *relock(&self.state)
    }

    /// The most recent session, if one was requested.
    pub fn session(&self) -> Option<DeviceAuthorizationSession> {
        relock(&self.session).clone()
    }

    /// Ask the server for a device code and user code, retrying once on
    /// transport failure. The session is cached on the flow.
    pub async fn device_flow_authorization_request(&self) -> Result<DeviceAuthorizationSession> {
        let core = &self.core;
        let request = &Request::form_post(
            self.authorization_endpoint(),
            &self.authorization_params(),
        );
        let response = RetryPolicy::attempts(2)
            .execute_if(OAuthError::is_transport, move || async move {
                core.send(request).await
            })
            .await?
            .error_for_status()?;

        let session = DeviceAuthorizationSession::from_response(&response.json_value()?)?;
        tracing::info!(
            client_id = %self.client_id(),
            verification_uri = %session.verification_uri,
            expires_in = session.expires_in,
            interval = session.interval,
            "device authorization started"
        );
        self.cache_session(session.clone());
        self.set_state(DevicePollState::Requested);
        Ok(session)
    }

    fn cache_session(&self, session: DeviceAuthorizationSession) {
        *relock(&self.session) = Some(session);
    }

    fn set_state(&self, next: DevicePollState) {
        *relock(&self.state) = next;
    }

    /// Token request body for polling `session`.
    pub fn poll_params(&self, session: &DeviceAuthorizationSession) -> Params {
        let mut params = Params::new();
        params.insert("grant_type".to_string(), GrantType::DeviceCode.to_string());
        params.insert("device_code".to_string(), session.device_code.clone());
        params.insert("client_id".to_string(), self.client_id().to_string());
        params.extend(
            self.core
                .config()
                .additional_token_params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        params
    }

    // Single-shot: polling has its own schedule, so no retry wrapper here.
    async fn poll_once(&self, request: &Request) -> Result<PollDecision<TokenSet>> {
        match self.core.exchange_tokens(request).await {
            Ok(tokens) => Ok(PollDecision::Ready(tokens)),
            Err(err) => match err.oauth_error_code() {
                Some("authorization_pending") => Ok(PollDecision::Pending),
                Some("slow_down") => Ok(PollDecision::SlowDown),
                Some("access_denied") => Err(OAuthError::Denied),
                Some("expired_token") => Err(OAuthError::DeviceCodeExpired),
                _ => Err(err),
            },
        }
    }
}

#[async_trait]
impl OAuthFlow for DeviceAuthorizationFlow {
    fn core(&self) -> &FlowCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FlowCore {
        &mut self.core
    }

    fn authorization_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("client_id".to_string(), self.client_id().to_string());
        merge_scope_and_extras(
            &mut params,
            self.core.config(),
            &self.core.config().additional_authorization_params,
        );
        params
    }

    /// Uses the device code of the cached session, if any.
    fn token_request_params(&self) -> Params {
        match self.session() {
            Some(session) => self.poll_params(&session),
            None => {
                let mut params = Params::new();
                params.insert("grant_type".to_string(), GrantType::DeviceCode.to_string());
                params.insert("client_id".to_string(), self.client_id().to_string());
                params.extend(
                    self.core
                        .config()
                        .additional_token_params
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone())),
                );
                params
            }
        }
    }

    async fn authorization_response_handler(
        &self,
        response: AuthorizationResponse,
    ) -> Result<TokenSet> {
        let AuthorizationResponse::Device(session) = response else {
            return Err(OAuthError::ResponseNotDeviceFlowAuthResponse);
        };
        self.cache_session(session.clone());
        self.set_state(DevicePollState::Polling);

        let policy = PollPolicy {
            interval: Duration::from_secs(session.interval),
            slow_down_step: Duration::from_secs(SLOW_DOWN_STEP_SECS),
            max_elapsed: self.max_polling,
        };
        let request = &Request::form_post(self.token_endpoint(), &self.poll_params(&session));
        let guard = || {
            if session.is_expired() {
                Err(OAuthError::DeviceCodeExpired)
            } else {
                Ok(())
            }
        };
        let result = policy
            .run(session.requested_at, guard, move || self.poll_once(request))
            .await;

        let state = match &result {
            Ok(_) => DevicePollState::Authorized,
            Err(OAuthError::Denied) => DevicePollState::Denied,
            Err(OAuthError::DeviceCodeExpired) => DevicePollState::Expired,
            Err(OAuthError::PollingTooLong { .. }) => DevicePollState::TimedOut,
            Err(_) => DevicePollState::Failed,
        };
        self.set_state(state);
        match &result {
            Ok(_) => {
                tracing::info!(client_id = %self.client_id(), "device authorization complete")
            }
            Err(e) => tracing::warn!(
                client_id = %self.client_id(),
                %state,
                error = %e,
                "device authorization failed"
            ),
        }
        result
    }
}

// The guarded values are plain data, so a panic elsewhere cannot leave
// them half-written.
fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
