//! Redirect-callback validation shared by the redirect flows.

use reqwest::Url;

use super::AuthorizationResponse;
use crate::error::{OAuthError, Result};

/// Pull the authorization code out of a redirect URL, checking `state`.
pub(crate) fn authorization_code(
    response: AuthorizationResponse,
    expected_state: &str,
) -> Result<String> {
    let AuthorizationResponse::Callback(raw) = response else {
        return Err(OAuthError::ResponseNotUrl);
    };
    let url = Url::parse(raw.trim()).map_err(|_| OAuthError::ResponseNotUrl)?;

    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        return Err(OAuthError::AuthorizationError(describe_error(fragment)));
    }

    let mut code = None;
    let mut state = None;
    let mut error = false;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = true,
            _ => {}
        }
    }
    if error {
        return Err(OAuthError::AuthorizationError(describe_error(
            url.query().unwrap_or_default(),
        )));
    }

    let (Some(code), Some(state)) = (code, state) else {
        return Err(OAuthError::AuthCallbackInvalid);
    };
    if state != expected_state {
        tracing::warn!("authorization callback carried an unexpected state");
        return Err(OAuthError::StateIncorrect);
    }
    Ok(code)
}

// `error: error_description` when the pairs carry an RFC 6749 error,
// otherwise the raw string.
fn describe_error(encoded: &str) -> String {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(encoded).unwrap_or_default();
    let find = |key: &str| {
        pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    };
    match (find("error"), find("error_description")) {
        (Some(error), Some(description)) => format!("{error}: {description}"),
        (Some(error), None) => error.to_string(),
        _ => encoded.to_string(),
    }
}
