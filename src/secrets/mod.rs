//! Secret retrieval with a TTL cache
//!
//! Values come from a pluggable [`SecretBackend`] (process environment or a
//! managed vault) and are cached per `(name, version)` for `cache_ttl_seconds`.
//! A TTL of zero bypasses the cache entirely.

mod env;
mod manager;
mod value;

pub use env::EnvSecretBackend;
pub use manager::SecretManagerBackend;
pub use value::{SecretValue, serialize_exposed};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::clock::Clock;
use crate::config::{ExecutionMode, SecretBackendKind, SecretConfig};
use crate::identity::AccessTokenProvider;
use crate::{Error, Result};

/// Version alias for the newest secret version
pub const LATEST_VERSION: &str = "latest";

/// Source of truth for secret values
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync + 'static {
    /// Fetch `name` at `version`.
    async fn fetch(&self, name: &str, version: &str) -> Result<SecretValue>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// A secret value with the time it was fetched
#[derive(Clone)]
pub struct CachedSecret {
    /// Secret name
    pub name: String,
    value: SecretValue,
    /// When the value was fetched from the backend
    pub cached_at: DateTime<Utc>,
    /// Requested version
    pub version: String,
}

impl CachedSecret {
    /// Wrap a freshly fetched value.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        value: SecretValue,
        cached_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            cached_at,
            version: version.into(),
        }
    }

    /// Whether the entry is older than `ttl_seconds` at `now`.
    ///
    /// A TTL of zero is always expired.
    #[must_use]
    pub fn is_expired(&self, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
        if ttl_seconds == 0 {
            return true;
        }
        let ttl = TimeDelta::seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX));
        now.signed_duration_since(self.cached_at) > ttl
    }

    /// The raw value.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.value.expose_secret()
    }

    /// The masked value.
    #[must_use]
    pub fn value(&self) -> &SecretValue {
        &self.value
    }
}

impl fmt::Debug for CachedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedSecret")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("cached_at", &self.cached_at)
            .field("version", &self.version)
            .finish()
    }
}

impl fmt::Display for CachedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}={}", self.name, self.version, self.value)
    }
}

/// TTL cache in front of a [`SecretBackend`]
pub struct SecretCache {
    backend: Arc<dyn SecretBackend>,
    ttl_seconds: u64,
    entries: DashMap<(String, String), CachedSecret>,
    clock: Arc<dyn Clock>,
}

impl SecretCache {
    /// Create a cache around an explicit backend.
    #[must_use]
    pub fn new(backend: Arc<dyn SecretBackend>, ttl_seconds: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            ttl_seconds,
            entries: DashMap::new(),
            clock,
        }
    }

    /// Validate `config` and build the configured backend.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configuration is invalid, e.g. the
    /// managed vault is selected without a project id or its endpoint fails
    /// the transport check for `mode`.
    pub fn from_config(
        config: &SecretConfig,
        mode: ExecutionMode,
        identity: Arc<dyn AccessTokenProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate(mode)?;

        let backend: Arc<dyn SecretBackend> = match config.backend {
            SecretBackendKind::LocalEnv => Arc::new(EnvSecretBackend::new()),
            SecretBackendKind::SecretManager => {
                let project = config.vault_project_id.clone().ok_or_else(|| {
                    Error::Config("secrets.vault_project_id is required".to_string())
                })?;
                let endpoint = crate::verifier::parse_secure_uri(
                    "secrets.vault_endpoint",
                    &config.vault_endpoint,
                    mode,
                )?;
                Arc::new(SecretManagerBackend::new(
                    endpoint,
                    project,
                    identity,
                    config.timeout,
                )?)
            }
        };

        debug!(
            backend = backend.name(),
            ttl_seconds = config.cache_ttl_seconds,
            "Secret cache configured"
        );
        Ok(Self::new(backend, config.cache_ttl_seconds, clock))
    }

    /// Name of the backing store.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Configured TTL in seconds.
    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Get the latest version of `name`.
    pub async fn get(&self, name: &str) -> Result<SecretValue> {
        self.get_version(name, LATEST_VERSION).await
    }

    /// Get `name` at `version`, fetching on miss or expiry.
    ///
    /// # Errors
    ///
    /// Backend failures propagate. An expired entry is never returned in
    /// place of a failed fetch.
    pub async fn get_version(&self, name: &str, version: &str) -> Result<SecretValue> {
        let key = (name.to_string(), version.to_string());

        if self.ttl_seconds > 0 {
            let now = self.clock.now();
            if let Some(entry) = self.entries.get(&key)
                && !entry.is_expired(self.ttl_seconds, now)
            {
                telemetry_metrics::counter!("authguard_secret_cache_hits_total").increment(1);
                return Ok(entry.value.clone());
            }
        }

        telemetry_metrics::counter!("authguard_secret_cache_misses_total").increment(1);
        let value = self.backend.fetch(name, version).await?;
        debug!(
            secret = %name,
            version = %version,
            backend = self.backend.name(),
            "Secret refreshed"
        );

        if self.ttl_seconds > 0 {
            let fresh = CachedSecret::new(name, version, value.clone(), self.clock.now());
            self.store(key, fresh);
        }

        Ok(value)
    }

    /// Insert `fresh` unless the slot already holds a newer entry.
    fn store(&self, key: (String, String), fresh: CachedSecret) {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().cached_at <= fresh.cached_at {
                    occupied.insert(fresh);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
            }
        }
    }

    /// Drop every cached version of `name`.
    pub fn invalidate(&self, name: &str) {
        self.entries.retain(|(cached, _), _| cached != name);
    }

    /// Drop all cached entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
