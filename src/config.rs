//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::secrets::SecretValue;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "AUTHGUARD_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before building components.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Execution mode (controls the plaintext-transport exception)
    pub mode: ExecutionMode,
    /// Credential rate limiting
    pub rate_limit: RateLimitConfig,
    /// Secret cache
    pub secrets: SecretConfig,
    /// Ambient identity provider
    pub identity: IdentityConfig,
    /// Durable client registry
    pub registry: RegistryConfig,
    /// Token verifier (optional; absent = verification configured elsewhere)
    pub verifier: Option<VerifierSettings>,
}

impl Config {
    /// Load configuration from file and environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or any section fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTHGUARD_RATE_LIMIT__MAX_ATTEMPTS=5 -> rate_limit.max_attempts
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and validate configuration from a prepared figment.
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.validate()?;

        Ok(config)
    }

    /// Validate every section. Construction of the individual components
    /// repeats the relevant checks; this just fails fast at startup.
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.secrets.validate(self.mode)?;
        self.registry.validate()?;
        if let Some(ref verifier) = self.verifier {
            crate::verifier::VerifierConfig::from_settings(verifier, self.mode)?;
        }
        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }
}

/// Expand a leading `~` to the home directory.
pub(crate) fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Execution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// HTTPS required for every non-loopback URI
    #[default]
    Production,
    /// Plaintext HTTP tolerated for any host
    Development,
}

impl ExecutionMode {
    /// Whether this is production mode
    #[must_use]
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Attempts admitted per credential per window (1..=1000)
    pub max_attempts: u32,
    /// Sliding window length in seconds (1..=3600)
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            window_seconds: 60,
        }
    }
}

impl RateLimitConfig {
    /// Upper bound for `max_attempts`
    pub const MAX_ATTEMPTS_LIMIT: u32 = 1000;
    /// Upper bound for `window_seconds`
    pub const WINDOW_SECONDS_LIMIT: u64 = 3600;

    /// Check bounds.
    pub fn validate(&self) -> Result<()> {
        if !(1..=Self::MAX_ATTEMPTS_LIMIT).contains(&self.max_attempts) {
            return Err(Error::Config(format!(
                "rate_limit.max_attempts must be between 1 and {}, got {}",
                Self::MAX_ATTEMPTS_LIMIT,
                self.max_attempts
            )));
        }
        if !(1..=Self::WINDOW_SECONDS_LIMIT).contains(&self.window_seconds) {
            return Err(Error::Config(format!(
                "rate_limit.window_seconds must be between 1 and {}, got {}",
                Self::WINDOW_SECONDS_LIMIT,
                self.window_seconds
            )));
        }
        Ok(())
    }
}

/// Where secrets are read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackendKind {
    /// Process environment variables
    #[default]
    LocalEnv,
    /// Managed secret vault (Secret Manager REST API)
    SecretManager,
}

/// Secret cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    /// Backend
    pub backend: SecretBackendKind,
    /// Vault project (required for `secret_manager`)
    pub vault_project_id: Option<String>,
    /// Vault API endpoint
    pub vault_endpoint: String,
    /// Cache TTL in seconds (0..=3600; 0 = always refetch)
    pub cache_ttl_seconds: u64,
    /// Timeout for a single vault request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            backend: SecretBackendKind::LocalEnv,
            vault_project_id: None,
            vault_endpoint: "https://secretmanager.googleapis.com".to_string(),
            cache_ttl_seconds: 300,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SecretConfig {
    /// Upper bound for `cache_ttl_seconds`
    pub const MAX_TTL_SECONDS: u64 = 3600;

    /// Check the backend/project pairing, the TTL bound and, for the vault,
    /// the transport of `vault_endpoint`.
    pub fn validate(&self, mode: ExecutionMode) -> Result<()> {
        if self.cache_ttl_seconds > Self::MAX_TTL_SECONDS {
            return Err(Error::Config(format!(
                "secrets.cache_ttl_seconds must be at most {}, got {}",
                Self::MAX_TTL_SECONDS,
                self.cache_ttl_seconds
            )));
        }

        let has_project = self
            .vault_project_id
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty());

        match self.backend {
            SecretBackendKind::SecretManager if !has_project => Err(Error::Config(
                "secrets.vault_project_id is required for the secret_manager backend".to_string(),
            )),
            SecretBackendKind::SecretManager => {
                crate::verifier::parse_secure_uri(
                    "secrets.vault_endpoint",
                    &self.vault_endpoint,
                    mode,
                )?;
                Ok(())
            }
            SecretBackendKind::LocalEnv if self.vault_project_id.is_some() => Err(Error::Config(
                "secrets.vault_project_id is only valid with the secret_manager backend"
                    .to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Where short-lived access tokens come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Cloud metadata server token endpoint
    #[default]
    MetadataServer,
    /// A fixed token read from an environment variable (local development)
    Env,
}

/// Ambient identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Token source
    pub source: IdentitySource,
    /// Metadata server token endpoint
    pub metadata_url: String,
    /// Environment variable holding the token for the `env` source
    pub token_env: String,
    /// Timeout for a token request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            source: IdentitySource::MetadataServer,
            metadata_url: crate::identity::DEFAULT_METADATA_TOKEN_URL.to_string(),
            token_env: "AUTHGUARD_IDENTITY_TOKEN".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Client registry backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackend {
    /// One JSON document per client
    #[default]
    Document,
    /// Single SQL table (PostgreSQL or SQLite)
    Relational,
}

/// Client registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend
    pub backend: RegistryBackend,
    /// Document directory (default `~/.mcp-authguard/clients`)
    pub document_dir: Option<String>,
    /// Database URL without a password (`postgres://user@host/db`, `sqlite://path`)
    pub database_url: Option<String>,
    /// Table name
    pub table: String,
    /// Timeout for a single registry operation
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackend::Document,
            document_dir: None,
            database_url: None,
            table: "oauth_clients".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RegistryConfig {
    /// Check the backend has what it needs.
    pub fn validate(&self) -> Result<()> {
        if self.backend == RegistryBackend::Relational
            && self.database_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(Error::Config(
                "registry.database_url is required for the relational backend".to_string(),
            ));
        }
        crate::registry::validate_table_name(&self.table)
    }
}

/// Kind of token verifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifierKind {
    /// Local JWT verification
    #[default]
    Jwt,
    /// RFC 7662 token introspection
    Introspection,
}

/// Raw verifier settings, validated into a
/// [`VerifierConfig`](crate::verifier::VerifierConfig).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierSettings {
    /// Verifier kind
    pub kind: VerifierKind,
    /// Remote JSON Web Key Set URI
    pub jwks_uri: Option<String>,
    /// Embedded shared secret (HMAC algorithms)
    pub shared_secret: Option<SecretValue>,
    /// Embedded PEM public key (RSA / EC / Ed25519 algorithms)
    pub public_key_pem: Option<SecretValue>,
    /// Expected issuer
    pub issuer: Option<String>,
    /// Accepted audiences
    pub audience: Vec<String>,
    /// JWS algorithm (e.g. `RS256`)
    pub algorithm: String,
    /// Allowed clock skew in seconds (0..=120)
    pub clock_skew_seconds: u64,
    /// Introspection endpoint
    pub introspection_uri: Option<String>,
    /// Introspection client id
    pub client_id: Option<String>,
    /// Introspection client secret
    pub client_secret: Option<SecretValue>,
    /// Introspection request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for VerifierSettings {
    fn default() -> Self {
        Self {
            kind: VerifierKind::Jwt,
            jwks_uri: None,
            shared_secret: None,
            public_key_pem: None,
            issuer: None,
            audience: Vec::new(),
            algorithm: "RS256".to_string(),
            clock_skew_seconds: 60,
            introspection_uri: None,
            client_id: None,
            client_secret: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        // "ms" before "s": "100ms" also ends with 's'
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
