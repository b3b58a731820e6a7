//! Request-time credential guard
//!
//! Composes the safeguards that run before any token verification:
//!
//! ```text
//! Authorization header
//!   -> extract_bearer        (no credential => anonymous)
//!   -> TokenHash::of         (raw token never stored or logged)
//!   -> RateLimiter           (limited => rejected, verifier never called)
//!   -> TokenVerifier         (signature / introspection, external crypto)
//! ```

mod hasher;
pub mod middleware;
mod rate_limiter;

pub use hasher::{TOKEN_HASH_LEN, TokenHash, hash_token};
pub use middleware::{Caller, auth_middleware};
pub use rate_limiter::{CLEANUP_THRESHOLD, RateLimiter};

use std::sync::Arc;

use tracing::{debug, warn};

use crate::Result;

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// The scheme keyword is case-insensitive. Missing, malformed or empty
/// headers yield `None`.
#[must_use]
pub fn extract_bearer(header: Option<&str>) -> Option<&str> {
    let value = header?.trim_start();
    let (scheme, token) = value.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Identity established by a successful verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Subject (`sub` claim or introspection `sub`)
    pub subject: String,
    /// OAuth client the token was issued to, if known
    pub client_id: Option<String>,
    /// Granted scopes
    pub scopes: Vec<String>,
}

/// Verifies a bearer credential.
///
/// Signature checking and introspection live behind this trait; the guard
/// only decides whether to call it.
#[async_trait::async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verify `token`.
    ///
    /// Returns `Ok(None)` for an invalid credential. Errors mean the verifier
    /// itself failed (e.g. key set or introspection endpoint unreachable).
    async fn verify(&self, token: &str) -> Result<Option<Principal>>;
}

/// Why a credential was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Too many attempts with this credential in the current window
    RateLimited,
    /// The verifier did not accept the credential
    InvalidCredential,
}

/// Outcome of [`AuthGuard::authorize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// No credential presented
    Anonymous,
    /// Credential verified
    Authenticated(Principal),
    /// Credential rejected
    Rejected(RejectReason),
}

/// Rate-limited front door for a [`TokenVerifier`]
pub struct AuthGuard {
    limiter: Arc<RateLimiter>,
    verifier: Arc<dyn TokenVerifier>,
}

impl AuthGuard {
    /// Create a guard
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { limiter, verifier }
    }

    /// The rate limiter shared by this guard
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Decide what to do with a request's `Authorization` header.
    ///
    /// # Errors
    ///
    /// Propagates verifier failures. They are never turned into an
    /// anonymous or rejected decision.
    pub async fn authorize(&self, authorization: Option<&str>) -> Result<GuardDecision> {
        let Some(token) = extract_bearer(authorization) else {
            return Ok(GuardDecision::Anonymous);
        };

        let token_hash = TokenHash::of(token);

        if self.limiter.check_rate_limit(token_hash.as_str()) {
            return Ok(GuardDecision::Rejected(RejectReason::RateLimited));
        }

        match self.verifier.verify(token).await? {
            Some(principal) => {
                debug!(token_hash = %token_hash, subject = %principal.subject, "Credential verified");
                Ok(GuardDecision::Authenticated(principal))
            }
            None => {
                warn!(token_hash = %token_hash, "Credential rejected by verifier");
                Ok(GuardDecision::Rejected(RejectReason::InvalidCredential))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_case_insensitively() {
        assert_eq!(extract_bearer(Some("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("bearer abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("BEARER abc")), Some("abc"));
        assert_eq!(extract_bearer(Some("BeArEr   abc  ")), Some("abc"));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(extract_bearer(None), None);
        assert_eq!(extract_bearer(Some("")), None);
        assert_eq!(extract_bearer(Some("Bearer")), None);
        assert_eq!(extract_bearer(Some("Bearer   ")), None);
        assert_eq!(extract_bearer(Some("Basic dXNlcjpwYXNz")), None);
        assert_eq!(extract_bearer(Some("Bearerabc")), None);
    }
}
