use std::fmt;
use std::time::Duration;

use engine_logging::engine_debug;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use thiserror::Error;

/// Sentinel callers match on to drop the stored credential.
pub const TOKEN_EXPIRED_MESSAGE: &str = "Token expired. Please log in again.";

const AUTH_HEADER: &str = "auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestMethod {
    Get,
    /// POST with a JSON body.
    Post,
    /// POST with a raw text body and no extra headers.
    PostData,
    /// PUT with raw bytes. No request timeout.
    Put,
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestMethod::Get => "GET",
            RestMethod::Post => "POST",
            RestMethod::PostData => "POST-DATA",
            RestMethod::Put => "PUT",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Empty,
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl Payload {
    fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Json(value) => value.to_string().len(),
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub url: String,
    pub method: RestMethod,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
}

impl RestRequest {
    fn new(method: RestMethod, url: impl Into<String>, payload: Payload) -> Self {
        Self {
            url: url.into(),
            method,
            headers: Vec::new(),
            payload,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(RestMethod::Get, url, Payload::Empty)
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self::new(RestMethod::Post, url, Payload::Json(body))
    }

    /// A JSON POST without a body.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(RestMethod::Post, url, Payload::Empty)
    }

    pub fn post_text(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(RestMethod::PostData, url, Payload::Text(body.into()))
    }

    pub fn put_bytes(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self::new(RestMethod::Put, url, Payload::Bytes(body))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attaches the credential header every authenticated call carries.
    pub fn auth(self, token: Option<&str>) -> Self {
        self.header(AUTH_HEADER, token.unwrap_or_default())
    }

    /// Header names only: values may hold credentials.
    fn describe(&self) -> String {
        let names: Vec<&str> = self.headers.iter().map(|(name, _)| name.as_str()).collect();
        format!(
            "url={}\nmethod={}\nheaders={:?}\npayload={} bytes",
            self.url,
            self.method,
            names,
            self.payload.len()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RestResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json(&self) -> Result<Value, RestError> {
        serde_json::from_slice(&self.body).map_err(|err| {
            RestError::new(
                RestErrorKind::Decode,
                Some(self.status),
                format!("Could not decode response: {err}"),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestErrorKind {
    Informational,
    Redirection,
    TokenExpired,
    Client,
    Server,
    UnknownStatus,
    Timeout,
    Transport,
    Decode,
}

/// A failed request. `Display` is the user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RestError {
    pub kind: RestErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl RestError {
    pub fn new(kind: RestErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    pub fn is_token_expired(&self) -> bool {
        self.kind == RestErrorKind::TokenExpired
    }
}

/// Maps a status code to success or a classified failure.
pub fn classify(status: u16, body: &str) -> Result<(), RestError> {
    let (kind, label) = match status {
        200..=299 => return Ok(()),
        401 => {
            return Err(RestError::new(
                RestErrorKind::TokenExpired,
                Some(status),
                TOKEN_EXPIRED_MESSAGE,
            ))
        }
        100..=199 => (RestErrorKind::Informational, "Informational"),
        300..=399 => (RestErrorKind::Redirection, "Redirection"),
        400..=499 => (RestErrorKind::Client, "Client Error"),
        500..=599 => (RestErrorKind::Server, "Server Error"),
        _ => (RestErrorKind::UnknownStatus, "Unknown Status"),
    };
    Err(RestError::new(kind, Some(status), format!("{status}: {label}: {body}")))
}

#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub connect_timeout: Duration,
    /// Applied to everything except PUT.
    pub request_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Issues one request without blocking the caller's event loop.
#[async_trait::async_trait]
pub trait RestTransport: Send + Sync {
    async fn request(&self, request: RestRequest) -> Result<RestResponse, RestError>;
}

/// Runs each request on the runtime's blocking worker pool with a fresh
/// blocking client, and classifies the status before returning.
#[derive(Debug, Clone, Default)]
pub struct PooledTransport {
    settings: TransportSettings,
}

impl PooledTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self { settings }
    }
}

#[async_trait::async_trait]
impl RestTransport for PooledTransport {
    async fn request(&self, request: RestRequest) -> Result<RestResponse, RestError> {
        let settings = self.settings.clone();
        let description = request.describe();
        engine_debug!("{} {}", request.method, request.url);

        let response = tokio::task::spawn_blocking(move || execute_blocking(&settings, request))
            .await
            .map_err(|err| {
                RestError::new(
                    RestErrorKind::Transport,
                    None,
                    format!("Request worker failed: {err}\n{description}"),
                )
            })??;

        classify(response.status, &response.text())?;
        Ok(response)
    }
}

fn execute_blocking(
    settings: &TransportSettings,
    request: RestRequest,
) -> Result<RestResponse, RestError> {
    let description = request.describe();
    let timeout = match request.method {
        RestMethod::Put => None,
        _ => Some(settings.request_timeout),
    };
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(settings.connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|err| transport_error(&err, &description))?;

    let mut builder = match request.method {
        RestMethod::Get => client.get(&request.url),
        RestMethod::Post | RestMethod::PostData => client.post(&request.url),
        RestMethod::Put => client.put(&request.url),
    };
    if request.method != RestMethod::PostData {
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }
    builder = match request.payload {
        Payload::Empty => builder,
        Payload::Json(value) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(value.to_string()),
        Payload::Text(text) => builder.body(text),
        Payload::Bytes(bytes) => builder.body(bytes),
    };

    let response = builder
        .send()
        .map_err(|err| transport_error(&err, &description))?;
    let status = response.status().as_u16();
    let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    let body = response
        .bytes()
        .map_err(|err| transport_error(&err, &description))?
        .to_vec();

    Ok(RestResponse {
        status,
        headers,
        body,
    })
}

fn transport_error(err: &reqwest::Error, description: &str) -> RestError {
    let kind = if err.is_timeout() {
        RestErrorKind::Timeout
    } else {
        RestErrorKind::Transport
    };
    RestError::new(
        kind,
        None,
        format!("Error requesting from API: {err}\n{description}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_2xx_is_success() {
        for status in 0u16..700 {
            let result = classify(status, "body");
            assert_eq!(result.is_ok(), (200..300).contains(&status), "status {status}");
            if let Err(err) = result {
                assert!(!err.message.is_empty());
                assert_eq!(err.status, Some(status));
            }
        }
    }

    #[test]
    fn unauthorized_is_token_expiry() {
        let err = classify(401, "whatever").unwrap_err();
        assert!(err.is_token_expired());
        assert!(err.to_string().starts_with("Token expired"));
    }

    #[test]
    fn other_failures_are_labelled() {
        assert_eq!(classify(102, "x").unwrap_err().to_string(), "102: Informational: x");
        assert_eq!(classify(302, "x").unwrap_err().to_string(), "302: Redirection: x");
        assert_eq!(classify(404, "nope").unwrap_err().to_string(), "404: Client Error: nope");
        assert_eq!(classify(503, "").unwrap_err().to_string(), "503: Server Error: ");
        assert_eq!(classify(403, "").unwrap_err().kind, RestErrorKind::Client);
        assert!(!classify(403, "").unwrap_err().is_token_expired());
    }

    #[test]
    fn description_hides_header_values() {
        let request = RestRequest::get("http://x/project").auth(Some("secret-token"));
        let description = request.describe();
        assert!(description.contains("auth"));
        assert!(!description.contains("secret-token"));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = RestResponse {
            status: 200,
            headers: vec![("etag".to_string(), "\"abc\"".to_string())],
            body: Vec::new(),
        };
        assert_eq!(response.header("ETag"), Some("\"abc\""));
        assert_eq!(response.header("missing"), None);
    }
}
