//! Document-store registry backend
//!
//! Each key is one JSON document named after the SHA-256 of the key:
//!
//! ```json
//! { "client_id": "...", "value": "<base64>", "created_at": "...", "updated_at": "..." }
//! ```
//!
//! Writes land in a temporary file that is renamed over the document, so a
//! reader sees either the old or the new document, never a partial one.
//! Writers of the same key are serialized in-process so `created_at` survives
//! racing inserts and a delete is never undone by an overlapping set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{ClientRegistry, RegistryEntry};
use crate::clock::Clock;
use crate::{Error, Result};

const DOCUMENT_EXT: &str = "json";

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    client_id: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Document {
    fn into_entry(self, path: &Path) -> Result<RegistryEntry> {
        let value = base64::engine::general_purpose::STANDARD
            .decode(self.value.as_bytes())
            .map_err(|e| {
                Error::Storage(format!("Corrupt value in {}: {e}", path.display()))
            })?;
        Ok(RegistryEntry {
            client_id: self.client_id,
            value,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Registry stored as JSON documents in a directory
pub struct DocumentRegistry {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    writers: DashMap<String, Arc<Mutex<()>>>,
}

impl DocumentRegistry {
    /// Open (and create if needed) the registry directory.
    pub fn new(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create registry dir {}: {e}",
                    dir.display()
                ))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
            }
        }

        Ok(Self {
            dir,
            clock,
            writers: DashMap::new(),
        })
    }

    /// Open the registry in the default location (`~/.mcp-authguard/clients`).
    pub fn default_location(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::new(super::default_document_dir()?, clock)
    }

    /// Registry directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Per-key writer lock
    fn writer_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.writers.entry(key.to_string()).or_default().clone()
    }

    /// Drop the lock for `key` once no writer holds it.
    fn release_writer(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.writers
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn document_path(&self, key: &str) -> PathBuf {
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        self.dir.join(format!("{name}.{DOCUMENT_EXT}"))
    }

    async fn read_document(path: &Path) -> Result<Option<Document>> {
        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| Error::Storage(format!("Corrupt document {}: {e}", path.display())))
    }

    async fn write_document(&self, path: &Path, document: &Document) -> Result<()> {
        let content = serde_json::to_vec_pretty(document)?;
        let tmp = self
            .dir
            .join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::Storage(format!("Failed to write {}: {e}", tmp.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Storage(format!(
                "Failed to replace {}: {e}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.document_path(key);
        let now = self.clock.now();
        let created_at = Self::read_document(&path)
            .await?
            .map_or(now, |existing| existing.created_at);

        let document = Document {
            client_id: key.to_string(),
            value: base64::engine::general_purpose::STANDARD.encode(value),
            created_at,
            updated_at: now,
        };
        self.write_document(&path, &document).await?;

        debug!(client_id = %key, "Stored registry document");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.document_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(client_id = %key, "Deleted registry document");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl ClientRegistry for DocumentRegistry {
    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let lock = self.writer_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.upsert(key, value).await
        };
        self.release_writer(key, lock);
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let lock = self.writer_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.remove(key).await
        };
        self.release_writer(key, lock);
        result
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::Storage(format!("Failed to list {}: {e}", self.dir.display()))
        })?;

        let mut found: Vec<(DateTime<Utc>, String)> = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXT) {
                continue;
            }
            // Deleted between read_dir and read
            let Some(document) = Self::read_document(&path).await? else {
                continue;
            };
            if document.client_id.starts_with(prefix) {
                found.push((document.updated_at, document.client_id));
            }
        }

        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(found.into_iter().map(|(_, key)| key).collect())
    }

    async fn entry(&self, key: &str) -> Result<Option<RegistryEntry>> {
        let path = self.document_path(key);
        match Self::read_document(&path).await? {
            Some(document) => document.into_entry(&path).map(Some),
            None => Ok(None),
        }
    }

    fn backend_name(&self) -> &'static str {
        "document"
    }
}
