//! Ambient identity provider.
//!
//! Backends that authenticate with short-lived bearer credentials (the SQL
//! registry, the Secret Manager backend) ask an [`AccessTokenProvider`] for a
//! token every time they open a connection or send a request. Providers do
//! not cache: each call returns a freshly retrieved credential.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::config::{IdentityConfig, IdentitySource};
use crate::secrets::SecretValue;
use crate::{Error, Result};

/// Metadata server endpoint for the default service account token
pub const DEFAULT_METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// A short-lived bearer credential
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Token value
    pub token: SecretValue,
    /// Expiry, if the provider reported one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Source of short-lived access tokens
#[async_trait::async_trait]
pub trait AccessTokenProvider: Send + Sync + 'static {
    /// Retrieve a fresh access token.
    async fn access_token(&self) -> Result<AccessToken>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

/// Token response from the metadata server
#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: SecretValue,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Fetches tokens from the cloud metadata server
pub struct MetadataServerTokenProvider {
    http: reqwest::Client,
    url: String,
}

impl MetadataServerTokenProvider {
    /// Create a provider for `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build metadata HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl AccessTokenProvider for MetadataServerTokenProvider {
    async fn access_token(&self) -> Result<AccessToken> {
        let response = self
            .http
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Credential(format!("Metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Credential(format!(
                "Metadata server returned {status}"
            )));
        }

        let body: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| Error::Credential(format!("Malformed metadata token response: {e}")))?;

        if body.access_token.is_empty() {
            return Err(Error::Credential(
                "Metadata server returned an empty token".to_string(),
            ));
        }

        let expires_at = body
            .expires_in
            .map(|secs| {
                TimeDelta::try_seconds(secs)
                    .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                    .ok_or_else(|| {
                        Error::Credential(format!("Metadata token expires_in out of range: {secs}"))
                    })
            })
            .transpose()?;
        debug!(provider = self.name(), ?expires_at, "Fetched access token");

        Ok(AccessToken {
            token: body.access_token,
            expires_at,
        })
    }

    fn name(&self) -> &'static str {
        "metadata_server"
    }
}

/// Returns the same token on every call
pub struct StaticTokenProvider {
    token: SecretValue,
}

impl StaticTokenProvider {
    /// Wrap a fixed token.
    #[must_use]
    pub fn new(token: SecretValue) -> Self {
        Self { token }
    }

    /// Read the token from an environment variable.
    pub fn from_env(var: &str) -> Result<Self> {
        let token = std::env::var(var)
            .map_err(|_| Error::Config(format!("Identity token variable '{var}' is not set")))?;
        if token.is_empty() {
            return Err(Error::Config(format!(
                "Identity token variable '{var}' is empty"
            )));
        }
        Ok(Self::new(SecretValue::new(token)))
    }
}

#[async_trait::async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<AccessToken> {
        Ok(AccessToken {
            token: self.token.clone(),
            expires_at: None,
        })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Build the configured provider.
pub fn from_config(config: &IdentityConfig) -> Result<Arc<dyn AccessTokenProvider>> {
    match config.source {
        IdentitySource::MetadataServer => Ok(Arc::new(MetadataServerTokenProvider::new(
            config.metadata_url.clone(),
            config.timeout,
        )?)),
        IdentitySource::Env => Ok(Arc::new(StaticTokenProvider::from_env(&config.token_env)?)),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn metadata_provider_sends_flavor_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let provider = MetadataServerTokenProvider::new(
            format!("{}/token", server.uri()),
            Duration::from_secs(2),
        )
        .unwrap();

        let first = provider.access_token().await.unwrap();
        assert_eq!(first.token.expose_secret(), "ya29.fresh");
        assert!(first.expires_at.is_some());

        // No caching: a second call hits the server again
        provider.access_token().await.unwrap();
    }

    #[tokio::test]
    async fn metadata_provider_surfaces_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let provider =
            MetadataServerTokenProvider::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Credential(_)));
    }

    #[tokio::test]
    async fn metadata_provider_rejects_absurd_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.fresh",
                "expires_in": i64::MAX,
            })))
            .mount(&server)
            .await;

        let provider =
            MetadataServerTokenProvider::new(server.uri(), Duration::from_secs(2)).unwrap();
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Credential(ref m) if m.contains("expires_in")));
        assert!(!err.to_string().contains("ya29.fresh"));
    }

    #[tokio::test]
    async fn static_provider_returns_token() {
        let provider = StaticTokenProvider::new(SecretValue::new("local-dev"));
        let token = provider.access_token().await.unwrap();
        assert_eq!(token.token.expose_secret(), "local-dev");
        assert!(token.expires_at.is_none());
    }

    #[test]
    fn static_provider_requires_variable() {
        assert!(StaticTokenProvider::from_env("AUTHGUARD_TEST_UNSET_TOKEN_VAR_91").is_err());
    }
}
