//! Remote key-value secret store over HTTP.
//!
//! Protocol: `GET <base>/v1/secrets/<name>` with an optional bearer token.
//! `200` returns `{"value": "..."}`, `404` means the secret is absent.
//! No retries are made here; retry policy belongs to the caller.

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, SecretError};

use super::source::{SecretSource, SecretValue};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Secret store client.
#[derive(Debug, Clone)]
pub struct HttpSecretSource {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash.
    base_url: String,
    /// Optional bearer token.
    token: Option<SecretValue>,
}

/// Secret lookup response body.
#[derive(Debug, Deserialize)]
struct SecretResponse {
    value: String,
}

impl HttpSecretSource {
    /// Creates a client for the store at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SecretError::Source {
                source_name: base_url.to_string(),
                name: String::from("*"),
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Authenticates requests with a bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(SecretValue::new(token));
        self
    }

    fn failure(&self, name: &str, message: impl Into<String>) -> SecretError {
        SecretError::Source {
            source_name: self.source_name(),
            name: name.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl SecretSource for HttpSecretSource {
    async fn get(&self, name: &str) -> Result<Option<SecretValue>> {
        let url = format!("{}/v1/secrets/{name}", self.base_url);
        trace!("Fetching secret '{name}' from {}", self.base_url);

        let mut request = self.client.get(&url).header(header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.failure(name, format!("request failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Secret '{name}' not present in {}", self.base_url);
                Ok(None)
            }
            status if status.is_success() => {
                let body: SecretResponse = response
                    .json()
                    .await
                    .map_err(|e| self.failure(name, format!("invalid response body: {e}")))?;
                Ok(Some(SecretValue::new(body.value)))
            }
            status => Err(self.failure(name, format!("unexpected status {status}")).into()),
        }
    }

    fn source_name(&self) -> String {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForgeError;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_secret_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/secrets/HF_TOKEN"))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": "hf_abc"})))
            .mount(&server)
            .await;

        let source = HttpSecretSource::new(&server.uri()).unwrap().with_token("t0k");
        let value = source.get("HF_TOKEN").await.unwrap().unwrap();
        assert_eq!(value.expose(), "hf_abc");
    }

    #[tokio::test]
    async fn test_not_found_is_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpSecretSource::new(&server.uri()).unwrap();
        assert!(source.get("MISSING").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_error_is_a_source_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = HttpSecretSource::new(&server.uri()).unwrap();
        assert!(matches!(
            source.get("ANY").await,
            Err(ForgeError::Secret(SecretError::Source { .. }))
        ));
    }
}
