//! Request/response codec shared by every flow.
//!
//! A [`Request`] is a transport-independent description of a call. It is
//! lowered into an [`HttpRequest`] (parsed URL, concrete headers, encoded
//! body bytes) right before it is handed to an [`HttpTransport`].

pub mod transport;

pub use transport::{HttpTransport, ReqwestTransport, TransportConfig};

use std::collections::BTreeMap;
use std::time::Duration;

use bon::Builder;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::error::{OAuthError, Result};

/// Untyped request body.
pub type Body = serde_json::Map<String, Value>;

/// String parameters (authorization query, token body).
pub type Params = BTreeMap<String, String>;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

/// How a [`Body`] is written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BodyEncoding {
    /// `application/x-www-form-urlencoded`
    #[default]
    Form,
    /// `application/json`
    Json,
}

impl BodyEncoding {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Form => "application/x-www-form-urlencoded",
            Self::Json => "application/json",
        }
    }
}

/// Outbound request description.
///
/// # Example
/// ```
/// use roci_oauth::http::{BodyEncoding, Method, Request};
///
/// let request = Request::builder()
///     .endpoint("https://api.example.com/v1/me")
///     .method(Method::Get)
///     .query(vec![("fields".to_string(), "id,name".to_string())])
///     .encoding(BodyEncoding::Json)
///     .build();
/// assert_eq!(request.method, Method::Get);
/// ```
#[derive(Debug, Clone, Builder)]
pub struct Request {
    #[builder(into)]
    pub endpoint: String,
    #[builder(default)]
    pub query: Vec<(String, String)>,
    #[builder(default)]
    pub method: Method,
    pub body: Option<Body>,
    #[builder(default)]
    pub encoding: BodyEncoding,
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Form-encoded POST carrying `params` as the body.
    pub fn form_post(endpoint: impl Into<String>, params: &Params) -> Self {
        let body: Body = params
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Self::builder()
            .endpoint(endpoint)
            .method(Method::Post)
            .body(body)
            .encoding(BodyEncoding::Form)
            .build()
    }

    /// Set a header, replacing any existing header with the same name
    /// (compared case-insensitively).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.headers.insert(name, value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Lower into a concrete transport request.
    pub fn to_http(&self) -> Result<HttpRequest> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| {
            OAuthError::Configuration(format!("invalid endpoint `{}`: {e}", self.endpoint))
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(self.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let body = match &self.body {
            Some(body) => Some(encode_body(body, self.encoding)?),
            None => None,
        };

        let mut headers: Vec<(String, String)> =
            vec![("Accept".to_string(), "application/json".to_string())];
        if body.is_some() {
            headers.push((
                "Content-Type".to_string(),
                self.encoding.content_type().to_string(),
            ));
        }
        for (name, value) in &self.headers {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
            headers.push((name.clone(), value.clone()));
        }

        Ok(HttpRequest {
            method: self.method,
            url,
            headers,
            body,
            timeout: self.timeout,
        })
    }
}

/// Encode a body with the chosen encoding.
///
/// Form encoding follows `application/x-www-form-urlencoded`: unreserved
/// characters pass through, space becomes `+`, everything else is
/// percent-encoded. Only scalar members can be form-encoded; `null`
/// members are dropped.
pub fn encode_body(body: &Body, encoding: BodyEncoding) -> Result<Vec<u8>> {
    match encoding {
        BodyEncoding::Json => Ok(serde_json::to_vec(body)?),
        BodyEncoding::Form => {
            let mut pairs: Vec<(&str, String)> = Vec::with_capacity(body.len());
            for (key, value) in body {
                let value = match value {
                    Value::Null => continue,
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(OAuthError::HttpFormParsingFailure(format!(
                            "field `{key}` is not a scalar value"
                        )))
                    }
                };
                pairs.push((key.as_str(), value));
            }
            serde_urlencoded::to_string(&pairs)
                .map(String::into_bytes)
                .map_err(|e| OAuthError::HttpFormParsingFailure(e.to_string()))
        }
    }
}

/// Concrete request handed to a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Decode a form-encoded body back into pairs. A request without a
    /// body decodes to no pairs.
    pub fn form_body(&self) -> Result<Params> {
        let Some(bytes) = self.body.as_deref() else {
            return Ok(Params::new());
        };
        let content_type = self.header("content-type").unwrap_or_default();
        if content_type != BodyEncoding::Form.content_type() {
            return Err(OAuthError::HttpFormParsingFailure(format!(
                "body has content type `{content_type}`"
            )));
        }
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(bytes)
            .map_err(|e| OAuthError::HttpFormParsingFailure(e.to_string()))?;
        Ok(pairs.into_iter().collect())
    }
}

/// Raw transport response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.body).map_err(|e| OAuthError::Serialization(e.to_string()))
    }

    pub fn json_value(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// RFC 6749 `error` member of a JSON body.
    pub fn oauth_error_code(&self) -> Option<String> {
        serde_json::from_slice::<Value>(&self.body)
            .ok()?
            .get("error")?
            .as_str()
            .map(str::to_string)
    }

    /// Convert a non-2xx response into [`OAuthError::Http`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(self.into_http_error())
    }

    pub(crate) fn into_http_error(self) -> OAuthError {
        let error = self.oauth_error_code();
        let body = match String::from_utf8(self.body) {
            Ok(text) => text,
            Err(_) => status_line(self.status),
        };
        OAuthError::Http {
            status: self.status,
            body,
            error,
        }
    }
}

fn status_line(status: u16) -> String {
    let reason = StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason());
    match reason {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}
