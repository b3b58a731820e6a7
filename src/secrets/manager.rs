//! Managed vault backend (Secret Manager REST API)
//!
//! `GET {endpoint}/v1/projects/{project}/secrets/{name}/versions/{version}:access`
//! with a bearer token from the ambient identity provider. The payload comes
//! back base64-encoded in `payload.data`.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use super::{SecretBackend, SecretValue};
use crate::identity::AccessTokenProvider;
use crate::{Error, Result};

#[derive(Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(Deserialize)]
struct Payload {
    data: String,
}

/// Secret Manager backend
pub struct SecretManagerBackend {
    http: reqwest::Client,
    endpoint: Url,
    project_id: String,
    credentials: Arc<dyn AccessTokenProvider>,
}

impl SecretManagerBackend {
    /// Create a backend for `project_id`.
    ///
    /// `endpoint` is used as given; callers check its transport first.
    pub fn new(
        endpoint: Url,
        project_id: impl Into<String>,
        credentials: Arc<dyn AccessTokenProvider>,
        timeout: Duration,
    ) -> Result<Self> {
        let project_id = project_id.into();
        if project_id.trim().is_empty() {
            return Err(Error::Config(
                "Secret Manager backend requires a project id".to_string(),
            ));
        }
        if endpoint.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "Secret Manager endpoint is not a base URL: {endpoint}"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build vault HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint,
            project_id,
            credentials,
        })
    }

    /// Build the `:access` URL, one encoded path segment per component.
    fn access_url(&self, name: &str, version: &str) -> Result<Url> {
        for part in [name, version] {
            if matches!(part, "" | "." | "..") {
                return Err(Error::SecretRetrieval {
                    name: name.to_string(),
                    reason: format!("invalid path component '{part}'"),
                });
            }
        }

        let last = format!("{version}:access");
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config("Secret Manager endpoint is not a base URL".to_string()))?
            .pop_if_empty()
            .extend([
                "v1",
                "projects",
                self.project_id.as_str(),
                "secrets",
                name,
                "versions",
                last.as_str(),
            ]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl SecretBackend for SecretManagerBackend {
    async fn fetch(&self, name: &str, version: &str) -> Result<SecretValue> {
        let retrieval_error = |reason: String| Error::SecretRetrieval {
            name: name.to_string(),
            reason,
        };

        let token = self.credentials.access_token().await?;

        let response = self
            .http
            .get(self.access_url(name, version)?)
            .bearer_auth(token.token.expose_secret())
            .send()
            .await
            .map_err(|e| retrieval_error(format!("request failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::SecretNotFound(name.to_string())),
            status if !status.is_success() => {
                warn!(secret = %name, version = %version, %status, "Vault access failed");
                return Err(retrieval_error(format!("vault returned {status}")));
            }
            _ => {}
        }

        let body: AccessResponse = response
            .json()
            .await
            .map_err(|e| retrieval_error(format!("malformed response: {e}")))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.payload.data.as_bytes())
            .map_err(|e| retrieval_error(format!("payload is not base64: {e}")))?;

        let value = SecretValue::from_utf8(bytes)
            .ok_or_else(|| retrieval_error("payload is not valid UTF-8".to_string()))?;

        debug!(secret = %name, version = %version, "Fetched secret from vault");
        Ok(value)
    }

    fn name(&self) -> &'static str {
        "secret_manager"
    }
}
