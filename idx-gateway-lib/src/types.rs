//! Core types for the gateway
//!
//! Defines the data structures used throughout the dispatch pipeline:
//! - Signable outbound requests
//! - Upstream responses
//! - Auth scheme selection
//! - Configuration

use crate::error::{GatewayError, Result};
use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;

/// Header carrying the request timestamp, signed on both request and response.
pub const AUTH_DATE_HEADER: &str = "Auth-Date";
/// Content type attached to every outbound request.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";
pub const CONTENT_TYPE_JSON: &str = "application/json";
/// Excluded from canonicalization when empty or "0".
pub const CONTENT_LENGTH_HEADER: &str = "Content-Length";
/// Carries the fully-qualified resource URL the request targets.
pub const IDX_ORIGIN_HEADER: &str = "X-IdxOrigin";
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Authentication scheme used for outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// base64 `username:password`; no signing chain, no response verification
    Basic,
    /// Canonical-request HMAC signing with mutual verification
    Digest,
}

impl std::str::FromStr for AuthScheme {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BASIC" => Ok(AuthScheme::Basic),
            "DIGEST" => Ok(AuthScheme::Digest),
            other => Err(GatewayError::UnsupportedAuthScheme(other.to_string())),
        }
    }
}

/// Process-wide immutable configuration, constructed once at startup and
/// passed explicitly into every component that needs it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Upstream service base URL, e.g. `https://tenant.example.com/tenant/Services/rest/v1`
    pub service_url: String,
    /// Chosen outbound auth scheme
    pub auth_scheme: AuthScheme,
    /// HTTP Basic credentials (only used under the Basic scheme)
    pub basic_username: String,
    pub basic_password: String,
    /// Bound on the outbound call; on expiry the request is abandoned
    pub upstream_timeout: Duration,
    /// When true, internal error detail is withheld from inbound callers
    pub production: bool,
}

impl GatewayConfig {
    /// Create a config with default settings: Digest auth, 3000ms timeout
    pub fn new(service_url: impl Into<String>) -> Self {
        Self {
            service_url: service_url.into(),
            auth_scheme: AuthScheme::Digest,
            basic_username: String::new(),
            basic_password: String::new(),
            upstream_timeout: Duration::from_millis(3000),
            production: false,
        }
    }

    pub fn with_auth_scheme(mut self, scheme: AuthScheme) -> Self {
        self.auth_scheme = scheme;
        self
    }

    pub fn with_basic_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.basic_username = username.into();
        self.basic_password = password.into();
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// Split a service URL into `(scheme, authority)`.
///
/// Only the scheme and host/port of the configured service URL participate in
/// outbound URL construction; any path component is ignored and the inbound
/// request path is appended to the authority directly.
pub fn parse_service_url(url: &str) -> Result<(&str, &str)> {
    let (scheme, rest) = if let Some(rest) = url.strip_prefix("https://") {
        ("https", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        ("http", rest)
    } else {
        return Err(GatewayError::config(format!(
            "Service URL must start with http:// or https://: {}",
            url
        )));
    };

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(GatewayError::config(format!(
            "Service URL has no host: {}",
            url
        )));
    }

    Ok((scheme, authority))
}

/// Collapse runs of `/` in a path to a single slash.
fn collapse_slashes(path: &str) -> String {
    let mut result = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !prev_slash {
                result.push(c);
            }
            prev_slash = true;
        } else {
            result.push(c);
            prev_slash = false;
        }
    }
    result
}

/// Case-insensitive header lookup on a plain header map.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Outbound request in signable form.
///
/// Created per inbound call and discarded once the call completes. The header
/// map is mutated in place by the signer; that shared-mutable state is local
/// to one request's lifetime.
#[derive(Debug, Clone)]
pub struct SignableRequest {
    /// HTTP method (GET, POST, ...)
    pub method: String,
    /// Canonical path, upstream-service-relative, duplicate slashes collapsed
    pub resource_path: String,
    /// Raw query string including the leading `?`, or empty when absent
    pub query_string: String,
    /// Fully-qualified resource URL without the query string
    pub href: String,
    /// Headers, one value per name; names compared case-insensitively
    pub headers: HashMap<String, String>,
    /// Raw body bytes; `None` when the inbound request had no body
    pub body: Option<Vec<u8>>,
    /// `yyyyMMdd'T'HHmmss'Z'` UTC, no fractional seconds
    pub timestamp: String,
    /// First 8 characters of `timestamp`
    pub datestamp: String,
    /// Fresh unpredictable token per request, UUID-shaped
    pub nonce: String,
}

impl SignableRequest {
    /// Build a signable request bound to the configured upstream service URL.
    ///
    /// `path_and_query` is the inbound request's original path and query
    /// (leading `/` included). The timestamp, datestamp, and nonce are
    /// generated here, once, and never change for the life of the request.
    pub fn new(
        method: impl Into<String>,
        path_and_query: &str,
        body: Option<Vec<u8>>,
        service_url: &str,
    ) -> Result<Self> {
        let (scheme, authority) = parse_service_url(service_url)?;

        let path_only = path_and_query.strip_prefix('/').unwrap_or(path_and_query);
        let (path_only, query_string) = match path_only.split_once('?') {
            Some((p, q)) => (p, format!("?{}", q)),
            None => (path_only, String::new()),
        };

        let href = format!("{}://{}/{}", scheme, authority, path_only);
        let resource_path = collapse_slashes(&format!("/{}", path_only));

        let timestamp = make_timestamp();
        let datestamp = timestamp[..8].to_string();

        Ok(Self {
            method: method.into(),
            resource_path,
            query_string,
            href,
            headers: HashMap::new(),
            body,
            timestamp,
            datestamp,
            nonce: make_nonce(),
        })
    }

    /// Set a header, replacing any existing value for that name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Fully-qualified resource URL with spaces percent-encoded.
    pub fn canonical_resource_url(&self) -> String {
        self.href.replace(' ', "%20")
    }

    /// Full outbound request URI including the query string.
    pub fn uri(&self) -> String {
        format!("{}{}", self.href, self.query_string)
    }
}

/// Current UTC time in the fixed `yyyyMMdd'T'HHmmss'Z'` format.
fn make_timestamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// UUID-shaped nonce: 8 groups of 4 hex digits in 8-4-4-4-12 layout.
fn make_nonce() -> String {
    let mut rng = rand::thread_rng();
    let mut s4 = || format!("{:04x}", rng.gen::<u16>());
    format!(
        "{}{}-{}-{}-{}-{}{}{}",
        s4(),
        s4(),
        s4(),
        s4(),
        s4(),
        s4(),
        s4(),
        s4()
    )
}

/// Result of a successfully dispatched upstream call.
///
/// Returned to the caller unchanged: the upstream's status, headers, and body.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_auth_scheme_from_str() {
        assert_eq!(AuthScheme::from_str("BASIC").unwrap(), AuthScheme::Basic);
        assert_eq!(AuthScheme::from_str("digest").unwrap(), AuthScheme::Digest);
        assert!(matches!(
            AuthScheme::from_str("NTLM"),
            Err(GatewayError::UnsupportedAuthScheme(_))
        ));
    }

    #[test]
    fn test_parse_service_url() {
        let (scheme, authority) =
            parse_service_url("https://tenant.example.com/tenant/Services/rest/v1").unwrap();
        assert_eq!(scheme, "https");
        assert_eq!(authority, "tenant.example.com");

        let (scheme, authority) = parse_service_url("http://localhost:8443").unwrap();
        assert_eq!(scheme, "http");
        assert_eq!(authority, "localhost:8443");

        assert!(parse_service_url("ftp://example.com").is_err());
        assert!(parse_service_url("https://").is_err());
    }

    #[test]
    fn test_signable_request_splits_path_and_query() {
        let req = SignableRequest::new(
            "GET",
            "/users/?limit=5&status=ACTIVE",
            None,
            "https://idx.example.com",
        )
        .unwrap();

        assert_eq!(req.method, "GET");
        assert_eq!(req.resource_path, "/users/");
        assert_eq!(req.query_string, "?limit=5&status=ACTIVE");
        assert_eq!(req.href, "https://idx.example.com/users/");
        assert_eq!(req.uri(), "https://idx.example.com/users/?limit=5&status=ACTIVE");
    }

    #[test]
    fn test_signable_request_no_query() {
        let req =
            SignableRequest::new("POST", "/users/", None, "https://idx.example.com").unwrap();
        assert_eq!(req.query_string, "");
        assert_eq!(req.uri(), "https://idx.example.com/users/");
    }

    #[test]
    fn test_signable_request_collapses_duplicate_slashes() {
        let req =
            SignableRequest::new("GET", "//users///abc", None, "https://idx.example.com").unwrap();
        assert_eq!(req.resource_path, "/users/abc");
    }

    #[test]
    fn test_timestamp_and_datestamp_invariants() {
        let req = SignableRequest::new("GET", "/", None, "https://idx.example.com").unwrap();

        // yyyyMMdd'T'HHmmss'Z': 16 chars, 'T' at 8, trailing 'Z'
        assert_eq!(req.timestamp.len(), 16);
        assert_eq!(&req.timestamp[8..9], "T");
        assert!(req.timestamp.ends_with('Z'));
        assert_eq!(req.datestamp, &req.timestamp[..8]);
        assert!(req.datestamp.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_nonce_is_uuid_shaped_and_fresh() {
        let a = SignableRequest::new("GET", "/", None, "https://idx.example.com").unwrap();
        let b = SignableRequest::new("GET", "/", None, "https://idx.example.com").unwrap();

        let groups: Vec<&str> = a.nonce.split('-').collect();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0].len(), 8);
        assert_eq!(groups[1].len(), 4);
        assert_eq!(groups[4].len(), 12);
        assert!(a.nonce.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));

        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_canonical_resource_url_encodes_spaces() {
        let req = SignableRequest::new(
            "GET",
            "/users/John Smith",
            None,
            "https://idx.example.com",
        )
        .unwrap();
        assert_eq!(
            req.canonical_resource_url(),
            "https://idx.example.com/users/John%20Smith"
        );
    }

    #[test]
    fn test_header_value_case_insensitive() {
        let mut headers = HashMap::new();
        headers.insert("Auth-Date".to_string(), "20230101T000000Z".to_string());

        assert_eq!(header_value(&headers, "auth-date"), Some("20230101T000000Z"));
        assert_eq!(header_value(&headers, "AUTH-DATE"), Some("20230101T000000Z"));
        assert_eq!(header_value(&headers, "missing"), None);
    }
}
