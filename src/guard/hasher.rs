//! One-way credential digests.
//!
//! A [`TokenHash`] stands in for a raw bearer credential anywhere the
//! credential would otherwise be stored or logged: rate-limit buckets, log
//! fields, audit lines.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a [`TokenHash`] in characters.
pub const TOKEN_HASH_LEN: usize = 16;

/// Truncated SHA-256 hex digest of a raw credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenHash(String);

impl TokenHash {
    /// Digest a raw credential.
    #[must_use]
    pub fn of(raw_credential: &str) -> Self {
        let digest = Sha256::digest(raw_credential.as_bytes());
        let mut hex = hex::encode(digest);
        hex.truncate(TOKEN_HASH_LEN);
        Self(hex)
    }

    /// The hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TokenHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Digest a raw credential. Shorthand for [`TokenHash::of`].
#[must_use]
pub fn hash_token(raw_credential: &str) -> TokenHash {
    TokenHash::of(raw_credential)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let a = hash_token("mcp_live_0123456789abcdef");
        let b = hash_token("mcp_live_0123456789abcdef");
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_length_for_any_input() {
        for input in ["", "x", &"long".repeat(4096)] {
            assert_eq!(hash_token(input).as_str().len(), TOKEN_HASH_LEN);
        }
    }

    #[test]
    fn distinct_inputs_distinct_hashes() {
        let hashes: std::collections::HashSet<_> =
            (0..1000).map(|i| hash_token(&format!("token-{i}"))).collect();
        assert_eq!(hashes.len(), 1000);
    }

    #[test]
    fn known_vector() {
        // sha256("abc") = ba7816bf8f01cfea414140de5dae2223...
        assert_eq!(hash_token("abc").as_str(), "ba7816bf8f01cfea");
    }

    #[test]
    fn does_not_contain_input() {
        let raw = "0123456789abcdef0123456789abcdef";
        let hash = hash_token(raw);
        assert!(!raw.contains(hash.as_str()));
        assert!(!hash.as_str().contains(raw));
    }

    #[test]
    fn output_is_lowercase_hex() {
        let hash = hash_token("Bearer-ish");
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
