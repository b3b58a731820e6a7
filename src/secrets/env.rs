//! Environment variable secret backend

use tracing::debug;

use super::{SecretBackend, SecretValue};
use crate::{Error, Result};

/// Reads secrets from process environment variables.
///
/// The secret name is the variable name, optionally behind a prefix. Versions
/// are not supported; only `latest` is accepted.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretBackend {
    prefix: String,
}

impl EnvSecretBackend {
    /// Read variables named exactly like the secret.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `{prefix}{name}`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait::async_trait]
impl SecretBackend for EnvSecretBackend {
    async fn fetch(&self, name: &str, version: &str) -> Result<SecretValue> {
        if version != super::LATEST_VERSION {
            return Err(Error::SecretRetrieval {
                name: name.to_string(),
                reason: format!("environment backend has no version '{version}'"),
            });
        }

        let var = format!("{}{name}", self.prefix);
        match std::env::var(&var) {
            Ok(value) => {
                debug!(secret = %name, "Read secret from environment");
                Ok(SecretValue::new(value))
            }
            Err(std::env::VarError::NotPresent) => Err(Error::SecretNotFound(name.to_string())),
            Err(std::env::VarError::NotUnicode(_)) => Err(Error::SecretRetrieval {
                name: name.to_string(),
                reason: "value is not valid UTF-8".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "local_env"
    }
}
