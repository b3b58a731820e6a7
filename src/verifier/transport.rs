//! Transport security for verifier endpoints

use url::{Host, Url};

use crate::config::ExecutionMode;
use crate::{Error, Result};

/// Parse `raw` and check it with [`require_secure_transport`].
pub fn parse_secure_uri(field: &str, raw: &str, mode: ExecutionMode) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("{field}: invalid URI: {e}")))?;
    require_secure_transport(field, &url, mode)?;
    Ok(url)
}

/// Require `https`, except for `http` to a loopback host, or any `http` host
/// outside production.
pub fn require_secure_transport(field: &str, url: &Url, mode: ExecutionMode) -> Result<()> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) || !mode.is_production() => Ok(()),
        "http" => Err(Error::Config(format!(
            "{field}: plaintext http is only allowed for loopback hosts in production mode"
        ))),
        other => Err(Error::Config(format!(
            "{field}: unsupported URI scheme '{other}'"
        ))),
    }
}

/// Whether the URL's parsed host is `localhost`, `127.0.0.0/8` or `::1`.
#[must_use]
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROD: ExecutionMode = ExecutionMode::Production;
    const DEV: ExecutionMode = ExecutionMode::Development;

    #[test]
    fn https_always_allowed() {
        assert!(parse_secure_uri("jwks_uri", "https://idp.example.com/jwks", PROD).is_ok());
        assert!(parse_secure_uri("jwks_uri", "https://idp.example.com/jwks", DEV).is_ok());
    }

    #[test]
    fn http_loopback_allowed_in_production() {
        for uri in [
            "http://localhost:8080/jwks",
            "http://LOCALHOST/jwks",
            "http://127.0.0.1:9000/introspect",
            "http://127.8.9.10/jwks",
            "http://[::1]:8443/jwks",
        ] {
            assert!(parse_secure_uri("uri", uri, PROD).is_ok(), "{uri}");
        }
    }

    #[test]
    fn http_remote_rejected_in_production() {
        for uri in [
            "http://idp.example.com/jwks",
            "http://localhost.attacker.example/jwks",
            "http://127.0.0.1.nip.io/jwks",
            "http://10.0.0.1/jwks",
        ] {
            assert!(parse_secure_uri("uri", uri, PROD).is_err(), "{uri}");
        }
    }

    #[test]
    fn http_remote_allowed_in_development() {
        assert!(parse_secure_uri("uri", "http://idp.internal/jwks", DEV).is_ok());
    }

    #[test]
    fn other_schemes_rejected() {
        assert!(parse_secure_uri("uri", "ftp://localhost/jwks", DEV).is_err());
        assert!(parse_secure_uri("uri", "file:///etc/jwks.json", DEV).is_err());
        assert!(parse_secure_uri("uri", "not a uri", DEV).is_err());
    }
}
