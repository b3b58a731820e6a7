//! MCP Auth Guard Library
//!
//! Request-authentication safeguards for Model Context Protocol (MCP) tool
//! servers.
//!
//! # Features
//!
//! - **Credential rate limiting**: sliding-window attempt limits keyed by a
//!   one-way hash of the presented bearer token
//! - **Secret cache**: environment or Secret Manager backends with per-entry TTL
//! - **Client registry**: durable OAuth dynamic client registrations that
//!   survive restarts (document store or relational table)
//! - **Verifier validation**: JWT / introspection configuration checks against
//!   algorithm confusion and plaintext transport
//!
//! # Request flow
//!
//! ```text
//! Authorization: Bearer <token>
//!   -> TokenHash (sha256, 16 hex chars)
//!   -> RateLimiter (per-hash window)
//!   -> TokenVerifier (jsonwebtoken / introspection)
//!   -> ClientRegistrationStore / SecretCache as needed
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod oauth;
pub mod registry;
pub mod secrets;
pub mod verifier;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let initialized = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    initialized.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
