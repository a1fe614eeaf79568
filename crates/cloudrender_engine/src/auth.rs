use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    Rejected(String),
    #[error("authentication service unreachable: {0}")]
    Unreachable(String),
    #[error("authentication response carried no token")]
    MissingToken,
}

/// The identity provider's login call. Blocking; the engine always runs it on
/// the worker pool.
pub trait Authenticator: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<String, AuthError>;
}

/// Posts `{username, password}` as JSON and reads `token` or `idToken` from
/// the reply.
#[derive(Debug, Clone)]
pub struct EndpointAuthenticator {
    url: String,
    timeout: Duration,
}

impl EndpointAuthenticator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl Authenticator for EndpointAuthenticator {
    fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| AuthError::Unreachable(err.to_string()))?;
        let response = client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(json!({ "username": username, "password": password }).to_string())
            .send()
            .map_err(|err| AuthError::Unreachable(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| AuthError::Unreachable(err.to_string()))?;
        if !status.is_success() {
            return Err(AuthError::Rejected(format!("{status}: {body}")));
        }

        let reply: Value = serde_json::from_str(&body).map_err(|_| AuthError::MissingToken)?;
        ["token", "idToken"]
            .iter()
            .find_map(|key| reply.get(*key).and_then(Value::as_str))
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned)
            .ok_or(AuthError::MissingToken)
    }
}
