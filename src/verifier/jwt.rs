//! JWT verifier configuration and the embedded-key verifier

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::transport::require_secure_transport;
use crate::config::ExecutionMode;
use crate::guard::{Principal, TokenVerifier};
use crate::secrets::SecretValue;
use crate::{Error, Result};

/// Largest accepted clock skew
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 120;

/// Where verification keys come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Remote JSON Web Key Set
    JwksUri(Url),
    /// Embedded HMAC secret
    SharedSecret(SecretValue),
    /// Embedded PEM public key
    PublicKeyPem(SecretValue),
}

/// Whether `algorithm` is an HMAC (shared-secret) algorithm
#[must_use]
pub fn is_symmetric(algorithm: Algorithm) -> bool {
    matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// Validated JWT verifier configuration
#[derive(Debug, Clone)]
pub struct JwtVerifierConfig {
    key_source: KeySource,
    algorithm: Algorithm,
    issuer: Option<String>,
    audience: Vec<String>,
    clock_skew_seconds: u64,
}

impl JwtVerifierConfig {
    /// Validate and build a JWT configuration.
    ///
    /// # Errors
    ///
    /// - clock skew above [`MAX_CLOCK_SKEW_SECONDS`]
    /// - a remote key set paired with an HMAC algorithm
    /// - a shared secret with an asymmetric algorithm, or a public key with
    ///   an HMAC algorithm
    /// - an empty shared secret or an unparseable public key
    /// - a key set URI that fails the transport rules for `mode`
    pub fn new(
        key_source: KeySource,
        algorithm: Algorithm,
        issuer: Option<String>,
        audience: Vec<String>,
        clock_skew_seconds: u64,
        mode: ExecutionMode,
    ) -> Result<Self> {
        if clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(Error::Config(format!(
                "verifier.clock_skew_seconds must be at most {MAX_CLOCK_SKEW_SECONDS}, got {clock_skew_seconds}"
            )));
        }

        match &key_source {
            KeySource::JwksUri(uri) => {
                if is_symmetric(algorithm) {
                    return Err(Error::Config(format!(
                        "verifier.algorithm {algorithm:?} is symmetric and cannot be used with a remote key set"
                    )));
                }
                require_secure_transport("verifier.jwks_uri", uri, mode)?;
            }
            KeySource::SharedSecret(secret) => {
                if !is_symmetric(algorithm) {
                    return Err(Error::Config(format!(
                        "verifier.algorithm {algorithm:?} requires a public key, not a shared secret"
                    )));
                }
                if secret.is_empty() {
                    return Err(Error::Config(
                        "verifier.shared_secret must not be empty".to_string(),
                    ));
                }
            }
            KeySource::PublicKeyPem(_) => {
                if is_symmetric(algorithm) {
                    return Err(Error::Config(format!(
                        "verifier.algorithm {algorithm:?} requires a shared secret, not a public key"
                    )));
                }
            }
        }

        let config = Self {
            key_source,
            algorithm,
            issuer: issuer.filter(|i| !i.is_empty()),
            audience,
            clock_skew_seconds,
        };

        if matches!(config.key_source, KeySource::PublicKeyPem(_)) {
            config.decoding_key()?;
        }

        Ok(config)
    }

    /// Key source
    #[must_use]
    pub fn key_source(&self) -> &KeySource {
        &self.key_source
    }

    /// Signing algorithm
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Expected issuer
    #[must_use]
    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    /// Accepted audiences
    #[must_use]
    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    /// Allowed clock skew
    #[must_use]
    pub fn clock_skew_seconds(&self) -> u64 {
        self.clock_skew_seconds
    }

    /// `jsonwebtoken` validation rules for this configuration.
    #[must_use]
    pub fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = self.clock_skew_seconds;
        if let Some(ref issuer) = self.issuer {
            validation.set_issuer(&[issuer]);
        }
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.audience);
        }
        validation
    }

    /// Decoding key for embedded key material.
    ///
    /// # Errors
    ///
    /// Fails for a remote key set (keys are fetched per `kid`) or when the
    /// PEM cannot be parsed for the configured algorithm.
    pub fn decoding_key(&self) -> Result<DecodingKey> {
        match &self.key_source {
            KeySource::JwksUri(_) => Err(Error::Config(
                "Remote key sets have no embedded decoding key".to_string(),
            )),
            KeySource::SharedSecret(secret) => {
                Ok(DecodingKey::from_secret(secret.expose_secret().as_bytes()))
            }
            KeySource::PublicKeyPem(pem) => {
                let pem = pem.expose_secret().as_bytes();
                let key = match self.algorithm {
                    Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
                    Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
                    _ => DecodingKey::from_rsa_pem(pem),
                };
                key.map_err(|e| Error::Config(format!("verifier.public_key_pem is invalid: {e}")))
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AccessClaims {
    sub: String,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    azp: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// [`TokenVerifier`] for tokens signed with embedded key material
pub struct StaticKeyVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl StaticKeyVerifier {
    /// Build a verifier from a validated configuration.
    ///
    /// # Errors
    ///
    /// Fails for a remote key set configuration.
    pub fn new(config: &JwtVerifierConfig) -> Result<Self> {
        Ok(Self {
            key: config.decoding_key()?,
            validation: config.validation(),
        })
    }
}

#[async_trait::async_trait]
impl TokenVerifier for StaticKeyVerifier {
    async fn verify(&self, token: &str) -> Result<Option<Principal>> {
        match jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation) {
            Ok(data) => {
                let claims = data.claims;
                Ok(Some(Principal {
                    subject: claims.sub,
                    client_id: claims.client_id.or(claims.azp),
                    scopes: claims
                        .scope
                        .map(|s| s.split_whitespace().map(str::to_owned).collect())
                        .unwrap_or_default(),
                }))
            }
            Err(e) => {
                debug!(error = %e, "JWT rejected");
                Ok(None)
            }
        }
    }
}
