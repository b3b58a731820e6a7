//! Client registration model and store

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::registry::ClientRegistry;
use crate::secrets::{SecretValue, serialize_exposed};
use crate::{Error, Result};

/// Registry key prefix for client registrations
pub const CLIENT_KEY_PREFIX: &str = "oauth_client:";

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_auth_method() -> String {
    "client_secret_basic".to_string()
}

/// Registered OAuth client metadata
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRegistration {
    /// Client identifier
    pub client_id: String,
    /// Client secret (absent for public clients)
    #[serde(
        default,
        serialize_with = "serialize_exposed",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<SecretValue>,
    /// Human-readable name
    #[serde(default)]
    pub client_name: Option<String>,
    /// Allowed redirect URIs
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Allowed grant types
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    /// Allowed response types
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    /// Token endpoint authentication method
    #[serde(default = "default_auth_method")]
    pub token_endpoint_auth_method: String,
    /// Space-separated scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// Issue time (Unix seconds)
    pub client_id_issued_at: i64,
    /// Secret expiry (Unix seconds, 0 = never)
    #[serde(default)]
    pub client_secret_expires_at: i64,
}

impl ClientRegistration {
    /// Register a new confidential client with a generated id and secret.
    #[must_use]
    pub fn new(client_name: Option<String>, redirect_uris: Vec<String>) -> Self {
        let secret: [u8; 32] = rand::random();

        Self {
            client_id: uuid::Uuid::new_v4().to_string(),
            client_secret: Some(SecretValue::new(
                base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret),
            )),
            client_name,
            redirect_uris,
            grant_types: default_grant_types(),
            response_types: default_response_types(),
            token_endpoint_auth_method: default_auth_method(),
            scope: None,
            client_id_issued_at: Utc::now().timestamp(),
            client_secret_expires_at: 0,
        }
    }

    /// Whether the client has no secret
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_secret.is_none()
    }

    fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        for uri in &self.redirect_uris {
            Url::parse(uri)
                .map_err(|e| Error::Config(format!("Invalid redirect URI '{uri}': {e}")))?;
        }
        Ok(())
    }
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret)
            .field("client_name", &self.client_name)
            .field("redirect_uris", &self.redirect_uris)
            .field("grant_types", &self.grant_types)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Registration storage on top of an injected [`ClientRegistry`]
#[derive(Clone)]
pub struct ClientRegistrationStore {
    registry: Arc<dyn ClientRegistry>,
}

impl ClientRegistrationStore {
    /// Create a store backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn ClientRegistry>) -> Self {
        Self { registry }
    }

    fn key(client_id: &str) -> String {
        format!("{CLIENT_KEY_PREFIX}{client_id}")
    }

    /// Persist (or replace) a registration.
    pub async fn register(&self, registration: &ClientRegistration) -> Result<()> {
        registration.validate()?;
        let blob = serde_json::to_vec(registration)?;
        self.registry
            .set(&Self::key(&registration.client_id), &blob)
            .await?;
        info!(
            client_id = %registration.client_id,
            backend = self.registry.backend_name(),
            "Registered OAuth client"
        );
        Ok(())
    }

    /// Look up a registration.
    pub async fn get(&self, client_id: &str) -> Result<Option<ClientRegistration>> {
        let Some(blob) = self.registry.get(&Self::key(client_id)).await? else {
            debug!(client_id = %client_id, "Unknown OAuth client");
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&blob)?))
    }

    /// Remove a registration. Removing an unknown client succeeds.
    pub async fn remove(&self, client_id: &str) -> Result<()> {
        self.registry.delete(&Self::key(client_id)).await
    }

    /// Registered client ids, most recently updated first.
    pub async fn client_ids(&self) -> Result<Vec<String>> {
        let keys = self.registry.list_keys(CLIENT_KEY_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(CLIENT_KEY_PREFIX).map(str::to_owned))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::registry::DocumentRegistry;

    fn store() -> (tempfile::TempDir, Arc<DocumentRegistry>, ClientRegistrationStore) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = Arc::new(DocumentRegistry::new(tmp.path(), SystemClock::shared()).unwrap());
        let store = ClientRegistrationStore::new(registry.clone());
        (tmp, registry, store)
    }

    #[test]
    fn new_registration_has_generated_credentials() {
        let a = ClientRegistration::new(Some("cli".to_string()), vec![]);
        let b = ClientRegistration::new(Some("cli".to_string()), vec![]);

        assert_ne!(a.client_id, b.client_id);
        assert!(uuid::Uuid::parse_str(&a.client_id).is_ok());
        // 32 bytes, unpadded url-safe base64
        assert_eq!(a.client_secret.as_ref().unwrap().len(), 43);
        assert_ne!(a.client_secret, b.client_secret);
        assert!(!a.is_public());
    }

    #[test]
    fn debug_masks_secret() {
        let reg = ClientRegistration::new(None, vec![]);
        let raw = reg.client_secret.as_ref().unwrap().expose_secret().to_string();
        assert!(!format!("{reg:?}").contains(&raw));
    }

    #[tokio::test]
    async fn round_trips_through_registry() {
        let (_tmp, registry, store) = store();
        let reg = ClientRegistration::new(
            Some("Claude Desktop".to_string()),
            vec!["http://localhost:33418/callback".to_string()],
        );

        store.register(&reg).await.unwrap();
        let loaded = store.get(&reg.client_id).await.unwrap().unwrap();
        assert_eq!(loaded, reg);

        // Stored under the prefixed key
        let key = format!("{CLIENT_KEY_PREFIX}{}", reg.client_id);
        assert!(registry.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn lists_only_client_keys() {
        let (_tmp, registry, store) = store();
        let reg = ClientRegistration::new(None, vec![]);
        store.register(&reg).await.unwrap();
        registry.set("other:thing", b"x").await.unwrap();

        assert_eq!(store.client_ids().await.unwrap(), vec![reg.client_id.clone()]);

        store.remove(&reg.client_id).await.unwrap();
        store.remove(&reg.client_id).await.unwrap();
        assert!(store.get(&reg.client_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_invalid_redirect_uri() {
        let (_tmp, _registry, store) = store();
        let reg = ClientRegistration::new(None, vec!["not a url".to_string()]);
        assert!(matches!(store.register(&reg).await, Err(Error::Config(_))));
    }

    #[test]
    fn deserializes_minimal_rfc7591_document() {
        let reg: ClientRegistration = serde_json::from_str(
            r#"{"client_id":"abc","client_id_issued_at":1700000000}"#,
        )
        .unwrap();
        assert!(reg.is_public());
        assert_eq!(reg.grant_types, vec!["authorization_code"]);
        assert_eq!(reg.token_endpoint_auth_method, "client_secret_basic");
    }
}
