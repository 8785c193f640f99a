mod auth_support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use roci_oauth::http::{ReqwestTransport, TransportConfig};
use roci_oauth::prelude::*;
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use auth_support::{memory_store, public_config, ScriptedTransport};

fn device_response(interval: u64, expires_in: u64) -> Value {
    json!({
        "device_code": "dev-1",
        "user_code": "ABCD-EFGH",
        "verification_uri": "https://auth.example.com/activate",
        "verification_uri_complete": "https://auth.example.com/activate?code=ABCD-EFGH",
        "interval": interval,
        "expires_in": expires_in
    })
}

fn device_flow(transport: Arc<ScriptedTransport>) -> DeviceAuthorizationFlow {
    DeviceAuthorizationFlow::new(
        public_config("https://auth.example.com"),
        memory_store(),
        transport,
    )
    .expect("flow")
}

fn poll_gaps(transport: &ScriptedTransport) -> Vec<u64> {
    transport
        .sent_at()
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn request_returns_and_caches_session() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    let flow = device_flow(transport.clone());
    assert_eq!(flow.poll_state(), DevicePollState::Idle);

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");

    assert_eq!(session.user_code, "ABCD-EFGH");
    assert_eq!(session.interval, 5);
    assert_eq!(
        session.verification_uri_complete.as_deref(),
        Some("https://auth.example.com/activate?code=ABCD-EFGH")
    );
    assert_eq!(flow.poll_state(), DevicePollState::Requested);
    assert_eq!(flow.session().expect("cached").user_code, "ABCD-EFGH");

    let request = &transport.requests()[0];
    assert_eq!(request.url.as_str(), "https://auth.example.com/device/code");
    let body = request.form_body().expect("form body");
    assert_eq!(body["client_id"], "abc");
    assert_eq!(body["scope"], "read");

    let params = flow.token_request_params();
    assert_eq!(params["grant_type"], "urn:ietf:params:oauth:grant-type:device_code");
    assert_eq!(params["device_code"], "dev-1");
    assert_eq!(params["client_id"], "abc");
}

#[tokio::test(start_paused = true)]
async fn request_accepts_verification_url_alias() {
    let transport = ScriptedTransport::new();
    transport.push_json(
        200,
        json!({
            "device_code": "dev-1",
            "user_code": "ABCD-EFGH",
            "verification_url": "https://auth.example.com/activate",
            "expires_in": 900
        }),
    );
    let session = device_flow(transport)
        .device_flow_authorization_request()
        .await
        .expect("session");
    assert_eq!(session.verification_uri, "https://auth.example.com/activate");
    assert_eq!(session.interval, 5);
}

#[tokio::test(start_paused = true)]
async fn request_with_missing_fields_is_invalid() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, json!({"user_code": "ABCD-EFGH", "expires_in": 900}));
    let err = device_flow(transport)
        .device_flow_authorization_request()
        .await
        .expect_err("missing device_code");
    assert!(matches!(err, OAuthError::ResponseInvalid(_)));
}

#[tokio::test(start_paused = true)]
async fn request_retries_once_on_transport_failure() {
    let transport = ScriptedTransport::new();
    transport.push_error(OAuthError::Network("connection reset".to_string()));
    transport.push_json(200, device_response(5, 900));
    let flow = device_flow(transport.clone());
    flow.device_flow_authorization_request()
        .await
        .expect("second attempt");
    assert_eq!(flow.token_request_params()["device_code"], "dev-1");
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn request_rejection_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.push_json(401, json!({"error": "invalid_client"}));
    transport.push_json(200, device_response(5, 900));
    let flow = device_flow(transport.clone());

    let err = flow
        .device_flow_authorization_request()
        .await
        .expect_err("rejected client");

    assert_eq!(err.oauth_error_code(), Some("invalid_client"));
    assert!(err.is_http_status(401));
    assert_eq!(transport.requests().len(), 1);
    assert_eq!(transport.remaining(), 1);
    assert!(flow.session().is_none());
}

#[tokio::test(start_paused = true)]
async fn zero_interval_polls_once_a_second() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(0, 900));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(200, json!({"access_token": "at-1"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    assert_eq!(session.interval, 1);
    flow.authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");

    assert_eq!(poll_gaps(&transport), vec![1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn huge_expiry_still_polls() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 9_223_372_036_854_775_808));
    transport.push_json(
        200,
        json!({"access_token": "at-1", "expires_in": 1_000_000_000_000_000_u64}),
    );
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    assert_eq!(session.expires_at(), None);
    let tokens = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");

    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(tokens.expires_at(), None);
    assert!(!tokens.needs_refresh_at(Utc::now()));
    assert_eq!(flow.poll_state(), DevicePollState::Authorized);
}

#[tokio::test(start_paused = true)]
async fn polls_until_authorized() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(200, json!({"access_token": "at-1", "refresh_token": "rt-1"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let tokens = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");

    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(flow.poll_state(), DevicePollState::Authorized);
    assert!(flow.is_authorized().expect("store"));
    assert_eq!(poll_gaps(&transport), vec![5, 5, 5]);

    let poll = &transport.requests()[1];
    assert_eq!(poll.url.as_str(), "https://auth.example.com/token");
    assert_eq!(poll.form_body().expect("form body")["device_code"], "dev-1");
}

#[tokio::test(start_paused = true)]
async fn pending_in_success_body_keeps_polling() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(1, 900));
    transport.push_json(200, json!({"error": "authorization_pending"}));
    transport.push_json(200, json!({"access_token": "at-1"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let tokens = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");
    assert_eq!(tokens.access_token, "at-1");
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn slow_down_adds_five_seconds() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    transport.push_json(400, json!({"error": "slow_down"}));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(400, json!({"error": "slow_down"}));
    transport.push_json(200, json!({"access_token": "at-1"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    flow.authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");

    assert_eq!(poll_gaps(&transport), vec![5, 10, 10, 15]);
}

#[tokio::test(start_paused = true)]
async fn polling_stops_after_fifteen_minutes() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(60, 1800));
    for _ in 0..20 {
        transport.push_json(400, json!({"error": "authorization_pending"}));
    }
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("timed out");

    match err {
        OAuthError::PollingTooLong { elapsed_secs } => assert_eq!(elapsed_secs, 960),
        other => panic!("expected PollingTooLong, got {other:?}"),
    }
    assert_eq!(flow.poll_state(), DevicePollState::TimedOut);
    // 15 polls at 60..=900 seconds; the 16th wake-up hits the bound.
    assert_eq!(transport.requests().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn polling_bound_is_configurable() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    for _ in 0..5 {
        transport.push_json(400, json!({"error": "authorization_pending"}));
    }
    let flow = device_flow(transport.clone()).with_max_polling(Duration::from_secs(10));

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("timed out");
    assert!(matches!(err, OAuthError::PollingTooLong { elapsed_secs: 15 }));
}

#[tokio::test(start_paused = true)]
async fn access_denied_stops_polling() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    transport.push_json(400, json!({"error": "authorization_pending"}));
    transport.push_json(400, json!({"error": "access_denied"}));
    transport.push_json(200, json!({"access_token": "never"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("denied");

    assert!(matches!(err, OAuthError::Denied));
    assert_eq!(flow.poll_state(), DevicePollState::Denied);
    assert_eq!(transport.remaining(), 1);
    assert!(!flow.is_authorized().expect("store"));
}

#[tokio::test(start_paused = true)]
async fn expired_token_error_maps_to_expired() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    transport.push_json(400, json!({"error": "expired_token"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("expired");
    assert!(matches!(err, OAuthError::DeviceCodeExpired));
    assert_eq!(flow.poll_state(), DevicePollState::Expired);
}

#[tokio::test(start_paused = true)]
async fn unknown_error_surfaces_as_http_error() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 900));
    transport.push_json(401, json!({"error": "invalid_client"}));
    let flow = device_flow(transport.clone());

    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("invalid client");

    assert!(err.is_http_status(401));
    assert_eq!(err.oauth_error_code(), Some("invalid_client"));
    assert_eq!(flow.poll_state(), DevicePollState::Failed);
    // Poll attempts are not retried.
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_never_polled() {
    let transport = ScriptedTransport::new();
    transport.push_json(200, device_response(5, 600));
    let flow = device_flow(transport.clone());

    let mut session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    session.created_at = Utc::now() - chrono::Duration::seconds(596);

    let err = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect_err("expired");
    assert!(matches!(err, OAuthError::DeviceCodeExpired));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn callback_response_is_rejected() {
    let flow = device_flow(ScriptedTransport::new());
    let err = flow
        .authorization_response_handler(AuthorizationResponse::Callback(
            "app://cb?code=XYZ&state=s".to_string(),
        ))
        .await
        .expect_err("wrong response kind");
    assert!(matches!(err, OAuthError::ResponseNotDeviceFlowAuthResponse));
}

#[tokio::test]
async fn device_flow_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/device/code"))
        .and(body_string_contains("client_id=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dev-http",
            "user_code": "WXYZ-1234",
            "verification_uri": "https://auth.example.com/activate",
            "expires_in": 900,
            "interval": 1
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("device_code=dev-http"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "authorization_pending"})),
        )
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-http",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = Arc::new(ReqwestTransport::new(TransportConfig::default()).expect("transport"));
    let flow = DeviceAuthorizationFlow::new(public_config(&server.uri()), memory_store(), transport)
        .expect("flow");
    let session = flow
        .device_flow_authorization_request()
        .await
        .expect("session");
    let tokens = flow
        .authorization_response_handler(AuthorizationResponse::Device(session))
        .await
        .expect("tokens");

    assert_eq!(tokens.access_token, "at-http");
    assert!(!tokens.is_refreshable());
}
