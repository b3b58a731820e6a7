//! Durable key/value storage for OAuth client registrations
//!
//! Two interchangeable backends implement [`ClientRegistry`]:
//!
//! - [`DocumentRegistry`]: one JSON document per key in a directory
//! - [`SqlRegistry`]: one row per key in a PostgreSQL or SQLite table
//!
//! Values are opaque bytes. A missing key is `Ok(None)`; storage failures are
//! always errors.

mod document;
mod relational;

pub use document::DocumentRegistry;
pub use relational::{Dialect, SqlRegistry};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::{RegistryBackend, RegistryConfig, expand_home};
use crate::identity::AccessTokenProvider;
use crate::{Error, Result};

/// Longest accepted table identifier (PostgreSQL's limit)
const MAX_TABLE_NAME_LEN: usize = 63;

/// A stored registration with its timestamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Key
    pub client_id: String,
    /// Opaque value
    pub value: Vec<u8>,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Most recent write
    pub updated_at: DateTime<Utc>,
}

/// Persistent client registry
#[async_trait::async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entry(key).await?.map(|entry| entry.value))
    }

    /// Insert or overwrite `key`. `created_at` survives overwrites.
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether `key` is stored.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Keys starting with `prefix` (all keys for an empty prefix), most
    /// recently updated first.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Full entry stored under `key`, if any.
    async fn entry(&self, key: &str) -> Result<Option<RegistryEntry>>;

    /// Prepare the backing store (create tables, directories). Idempotent.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// Check a table name is a plain SQL identifier.
///
/// The name is interpolated into DDL and queries, so only ASCII letters,
/// digits and underscores are accepted, starting with a letter or underscore.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && name.len() <= MAX_TABLE_NAME_LEN {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid registry table name '{name}'")))
    }
}

/// Default document directory (`~/.mcp-authguard/clients`).
pub fn default_document_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::Config("Cannot determine home directory".to_string()))?;
    Ok(home.join(".mcp-authguard").join("clients"))
}

/// Build the configured registry backend.
///
/// # Errors
///
/// Returns [`Error::Config`] for an invalid configuration and an I/O error
/// when the document directory cannot be created.
pub fn from_config(
    config: &RegistryConfig,
    identity: Arc<dyn AccessTokenProvider>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn ClientRegistry>> {
    config.validate()?;

    match config.backend {
        RegistryBackend::Document => {
            let dir = match config.document_dir.as_deref() {
                Some(dir) => PathBuf::from(expand_home(dir)),
                None => default_document_dir()?,
            };
            Ok(Arc::new(DocumentRegistry::new(dir, clock)?))
        }
        RegistryBackend::Relational => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                Error::Config("registry.database_url is required".to_string())
            })?;
            Ok(Arc::new(SqlRegistry::new(
                url,
                &config.table,
                identity,
                clock,
                config.timeout,
            )?))
        }
    }
}
