//! Token verifier configuration
//!
//! Verifier settings are checked once, at construction. A [`VerifierConfig`]
//! that exists is valid:
//!
//! - clock skew is at most 120 seconds
//! - a remote key set is never paired with an HMAC algorithm
//! - key-set and introspection URIs use https (loopback hosts excepted, and
//!   any host in development mode)
//! - key material and client secrets are masked in `Debug`

mod jwt;
mod transport;

pub use jwt::{
    JwtVerifierConfig, KeySource, MAX_CLOCK_SKEW_SECONDS, StaticKeyVerifier, is_symmetric,
};
pub use transport::{is_loopback, parse_secure_uri, require_secure_transport};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::config::{ExecutionMode, VerifierKind, VerifierSettings};
use crate::guard::TokenVerifier;
use crate::secrets::SecretValue;
use crate::{Error, Result};

/// Validated RFC 7662 introspection configuration
#[derive(Debug, Clone)]
pub struct IntrospectionVerifierConfig {
    introspection_uri: Url,
    client_id: String,
    client_secret: SecretValue,
    timeout: Duration,
}

impl IntrospectionVerifierConfig {
    /// Validate and build an introspection configuration.
    pub fn new(
        introspection_uri: &str,
        client_id: impl Into<String>,
        client_secret: SecretValue,
        timeout: Duration,
        mode: ExecutionMode,
    ) -> Result<Self> {
        let introspection_uri =
            parse_secure_uri("verifier.introspection_uri", introspection_uri, mode)?;

        let client_id = client_id.into();
        if client_id.trim().is_empty() {
            return Err(Error::Config(
                "verifier.client_id is required for introspection".to_string(),
            ));
        }
        if client_secret.is_empty() {
            return Err(Error::Config(
                "verifier.client_secret is required for introspection".to_string(),
            ));
        }

        Ok(Self {
            introspection_uri,
            client_id,
            client_secret,
            timeout,
        })
    }

    /// Introspection endpoint
    #[must_use]
    pub fn introspection_uri(&self) -> &Url {
        &self.introspection_uri
    }

    /// Client id used to authenticate to the endpoint
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Client secret used to authenticate to the endpoint
    #[must_use]
    pub fn client_secret(&self) -> &SecretValue {
        &self.client_secret
    }

    /// Request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// A validated verifier configuration
#[derive(Debug, Clone)]
pub enum VerifierConfig {
    /// Local JWT verification
    Jwt(JwtVerifierConfig),
    /// Remote token introspection
    Introspection(IntrospectionVerifierConfig),
}

impl VerifierConfig {
    /// Validate raw settings for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first violated rule.
    pub fn from_settings(settings: &VerifierSettings, mode: ExecutionMode) -> Result<Self> {
        match settings.kind {
            VerifierKind::Jwt => Self::jwt_from_settings(settings, mode).map(Self::Jwt),
            VerifierKind::Introspection => {
                let uri = settings.introspection_uri.as_deref().ok_or_else(|| {
                    Error::Config("verifier.introspection_uri is required".to_string())
                })?;
                let client_secret = settings.client_secret.clone().ok_or_else(|| {
                    Error::Config("verifier.client_secret is required".to_string())
                })?;
                IntrospectionVerifierConfig::new(
                    uri,
                    settings.client_id.clone().unwrap_or_default(),
                    client_secret,
                    settings.timeout,
                    mode,
                )
                .map(Self::Introspection)
            }
        }
    }

    fn jwt_from_settings(
        settings: &VerifierSettings,
        mode: ExecutionMode,
    ) -> Result<JwtVerifierConfig> {
        let algorithm = Algorithm::from_str(settings.algorithm.trim()).map_err(|_| {
            Error::Config(format!(
                "verifier.algorithm '{}' is not a supported JWS algorithm",
                settings.algorithm
            ))
        })?;

        let key_source = match (
            &settings.jwks_uri,
            &settings.shared_secret,
            &settings.public_key_pem,
        ) {
            (Some(uri), None, None) => KeySource::JwksUri(
                Url::parse(uri)
                    .map_err(|e| Error::Config(format!("verifier.jwks_uri: invalid URI: {e}")))?,
            ),
            (None, Some(secret), None) => KeySource::SharedSecret(secret.clone()),
            (None, None, Some(pem)) => KeySource::PublicKeyPem(pem.clone()),
            (None, None, None) => {
                return Err(Error::Config(
                    "verifier needs one of jwks_uri, shared_secret or public_key_pem".to_string(),
                ));
            }
            _ => {
                return Err(Error::Config(
                    "verifier accepts only one of jwks_uri, shared_secret or public_key_pem"
                        .to_string(),
                ));
            }
        };

        JwtVerifierConfig::new(
            key_source,
            algorithm,
            settings.issuer.clone(),
            settings.audience.clone(),
            settings.clock_skew_seconds,
            mode,
        )
    }

    /// Build a local verifier, if this configuration supports one.
    ///
    /// Only embedded key material verifies locally; remote key sets and
    /// introspection are served by the external identity library.
    pub fn local_verifier(&self) -> Result<Option<Arc<dyn TokenVerifier>>> {
        match self {
            Self::Jwt(jwt) if !matches!(jwt.key_source(), KeySource::JwksUri(_)) => {
                Ok(Some(Arc::new(StaticKeyVerifier::new(jwt)?)))
            }
            _ => Ok(None),
        }
    }
}
