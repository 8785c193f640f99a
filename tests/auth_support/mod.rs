#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roci_oauth::config::ClientConfig;
use roci_oauth::http::{HttpRequest, HttpTransport, Response};
use roci_oauth::store::MemorySecretStore;
use roci_oauth::token::TokenSet;
use roci_oauth::{OAuthError, Result};
use serde_json::Value;
use tokio::time::Instant;

/// Transport that replays queued responses and records what was sent.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Response>>>,
    sent: Mutex<Vec<(Instant, HttpRequest)>>,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every response take `delay` to arrive.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().expect("script lock poisoned") = delay;
    }

    pub fn push_json(&self, status: u16, body: Value) {
        self.push(Ok(Response::new(status, body.to_string())));
    }

    pub fn push_error(&self, error: OAuthError) {
        self.push(Err(error));
    }

    pub fn push(&self, response: Result<Response>) {
        self.responses
            .lock()
            .expect("script lock poisoned")
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.sent
            .lock()
            .expect("script lock poisoned")
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn sent_at(&self) -> Vec<Instant> {
        self.sent
            .lock()
            .expect("script lock poisoned")
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("script lock poisoned").len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<Response> {
        self.sent
            .lock()
            .expect("script lock poisoned")
            .push((Instant::now(), request));
        let delay = *self.delay.lock().expect("script lock poisoned");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.responses
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(OAuthError::Network("no scripted response".to_string())))
    }
}

pub fn config(endpoint: &str) -> ClientConfig {
    ClientConfig::builder()
        .client_id("abc")
        .client_secret("s3cret")
        .authorization_endpoint(format!("{endpoint}/authorize"))
        .token_endpoint(format!("{endpoint}/token"))
        .redirect_uri("app://cb")
        .build()
}

pub fn public_config(endpoint: &str) -> ClientConfig {
    ClientConfig::builder()
        .client_id("abc")
        .authorization_endpoint(format!("{endpoint}/device/code"))
        .token_endpoint(format!("{endpoint}/token"))
        .scope("read")
        .build()
}

pub fn memory_store() -> Arc<MemorySecretStore> {
    Arc::new(MemorySecretStore::new())
}

/// Seed `store` with a set written at `created_at` and no `issued_at`.
pub fn seed_tokens(
    store: &MemorySecretStore,
    key: &str,
    access_token: &str,
    refresh_token: &str,
    expires_in: u64,
    created_at: DateTime<Utc>,
) {
    let tokens = TokenSet {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        refresh_token: refresh_token.to_string(),
        expires_in,
        issued_at: None,
    };
    store
        .insert_at(key, &tokens.encode().expect("encode tokens"), created_at)
        .expect("seed store");
}

/// Redirect URL the authorization server would send back.
pub fn callback_url(code: &str, state: &str) -> String {
    format!("app://cb?code={code}&state={state}")
}
