//! Deterministic canonical forms for signable requests and responses.
//!
//! The canonical strings produced here are the exact input to hashing before
//! signing, so every byte matters: header ordering, the signed-header list,
//! query-token ordering, and the trailing body hash must all be reproducible
//! bit-for-bit on both sides of the exchange.
//!
//! Canonical request string:
//! ```text
//! METHOD
//! RESOURCE_PATH
//! CANONICAL_QUERY
//! name:value        (one line per signed header, trailing newline)
//!
//! signed;header;names
//! BODY_HASH_HEX
//! ```
//!
//! Canonical response string is the same minus method/path/query, with the
//! status code on the first line, and restricted to exactly the headers the
//! upstream declared it signed.

use crate::types::{SignableRequest, CONTENT_LENGTH_HEADER};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// SHA-256 of the raw body bytes as lowercase hex.
///
/// An absent body hashes as the empty byte sequence:
/// `e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855`
pub fn body_hash_hex(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Canonicalize a raw query string.
///
/// Strips the leading `?`. When multiple `key=value` pairs are joined by `&`,
/// the whole tokens are sorted lexicographically, not by key alone; the
/// upstream applies this exact tie-break. A single pair passes through
/// unchanged; an absent query canonicalizes to the empty string.
pub fn canonical_query_string(query: &str) -> String {
    let query = query.strip_prefix('?').unwrap_or(query);
    if query.contains('&') {
        let mut tokens: Vec<&str> = query.split('&').collect();
        tokens.sort_unstable();
        tokens.join("&")
    } else {
        query.to_string()
    }
}

/// Select and order the headers that participate in canonicalization.
///
/// Headers with empty values are dropped, `Content-Length` is dropped when its
/// value is empty or `"0"`, names are lower-cased, and the result is sorted by
/// ordinal comparison of the upper-cased name.
pub fn sorted_headers(headers: &HashMap<String, String>) -> Vec<(String, String)> {
    let mut selected: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, value)| {
            if value.is_empty() {
                return false;
            }
            if name.eq_ignore_ascii_case(CONTENT_LENGTH_HEADER) {
                return value.as_str() != "0";
            }
            true
        })
        .map(|(name, value)| (name.to_lowercase(), value.clone()))
        .collect();

    selected.sort_by(|a, b| a.0.to_uppercase().cmp(&b.0.to_uppercase()));
    selected
}

/// `name:value\n` per header, concatenated in the given order.
pub fn canonical_headers_string(headers: &[(String, String)]) -> String {
    let mut result = String::new();
    for (name, value) in headers {
        result.push_str(name);
        result.push(':');
        result.push_str(value);
        result.push('\n');
    }
    result
}

/// Semicolon-joined list of header names, in the given order.
///
/// Emitted both inside the canonical string and in the `Authorization` header
/// so the verifier canonicalizes exactly the same subset.
pub fn signed_headers_string(headers: &[(String, String)]) -> String {
    headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

/// Build the canonical request string for a signable request.
pub fn canonical_request_string(req: &SignableRequest) -> String {
    let headers = sorted_headers(&req.headers);
    let body = req.body.as_deref().unwrap_or(b"");

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method,
        req.resource_path,
        canonical_query_string(&req.query_string),
        canonical_headers_string(&headers),
        signed_headers_string(&headers),
        body_hash_hex(body),
    )
}

/// Build the canonical response string from the signed-header subset the
/// upstream declared.
///
/// `signed_headers` must already be restricted to the declared names, in the
/// declared order. This mirrors only what the upstream actually signed, not
/// every header on the wire.
pub fn canonical_response_string(
    status: u16,
    signed_headers: &[(String, String)],
    body: &[u8],
) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        status,
        canonical_headers_string(signed_headers),
        signed_headers_string(signed_headers),
        body_hash_hex(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_BODY_HASH: &str =
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_body_hash_empty() {
        assert_eq!(body_hash_hex(b""), EMPTY_BODY_HASH);
    }

    #[test]
    fn test_body_hash_known_value() {
        // sha256("1")
        assert_eq!(
            body_hash_hex(b"1"),
            "6b86b273ff34fce19d6b804eff5a3f5747ada4eaa22f1d49c01e52ddb7875b4b"
        );
    }

    #[test]
    fn test_canonical_query_sorts_whole_tokens() {
        assert_eq!(canonical_query_string("?b=2&a=1"), "a=1&b=2");
        assert_eq!(
            canonical_query_string("?limit=5&sortField=created&status=ACTIVE"),
            "limit=5&sortField=created&status=ACTIVE"
        );
    }

    #[test]
    fn test_canonical_query_single_pair_passthrough() {
        assert_eq!(canonical_query_string("?x=1"), "x=1");
    }

    #[test]
    fn test_canonical_query_absent_is_empty() {
        assert_eq!(canonical_query_string(""), "");
        assert_eq!(canonical_query_string("?"), "");
    }

    #[test]
    fn test_canonical_query_sorts_by_whole_token_not_key() {
        // Same key, values drive the order: token-wise sort, not key-only
        assert_eq!(canonical_query_string("?a=2&a=1"), "a=1&a=2");
    }

    #[test]
    fn test_sorted_headers_excludes_zero_content_length() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Auth-Date".to_string(), "20230101T000000Z".to_string());
        headers.insert("Content-Length".to_string(), "0".to_string());

        let sorted = sorted_headers(&headers);
        let names: Vec<&str> = sorted.iter().map(|(n, _)| n.as_str()).collect();

        // content-length dropped, alphabetical case-insensitive order
        assert_eq!(names, vec!["auth-date", "content-type"]);
    }

    #[test]
    fn test_sorted_headers_keeps_nonzero_content_length() {
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), "42".to_string());

        let sorted = sorted_headers(&headers);
        assert_eq!(sorted, vec![("content-length".to_string(), "42".to_string())]);
    }

    #[test]
    fn test_sorted_headers_drops_empty_values() {
        let mut headers = HashMap::new();
        headers.insert("X-Empty".to_string(), String::new());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let sorted = sorted_headers(&headers);
        assert_eq!(
            sorted,
            vec![("content-type".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn test_signed_headers_string() {
        let headers = vec![
            ("auth-date".to_string(), "20230101T000000Z".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
            ("x-idxorigin".to_string(), "https://idx.example.com/".to_string()),
        ];
        assert_eq!(
            signed_headers_string(&headers),
            "auth-date;content-type;x-idxorigin"
        );
    }

    #[test]
    fn test_canonical_request_string_layout() {
        let mut req = crate::types::SignableRequest::new(
            "GET",
            "/users/?limit=5&status=ACTIVE",
            None,
            "https://idx.example.com",
        )
        .unwrap();
        req.set_header("Auth-Date", "20170817T032140Z");
        req.set_header("Content-Type", "application/json");

        let canonical = canonical_request_string(&req);
        let expected = format!(
            "GET\n/users/\nlimit=5&status=ACTIVE\n\
             auth-date:20170817T032140Z\ncontent-type:application/json\n\n\
             auth-date;content-type\n{}",
            EMPTY_BODY_HASH
        );
        assert_eq!(canonical, expected);
    }

    #[test]
    fn test_canonical_response_string_layout() {
        let signed = vec![
            ("auth-date".to_string(), "20170816T061815Z".to_string()),
            ("content-type".to_string(), "application/json".to_string()),
        ];
        let canonical = canonical_response_string(200, &signed, b"");
        let expected = format!(
            "200\nauth-date:20170816T061815Z\ncontent-type:application/json\n\n\
             auth-date;content-type\n{}",
            EMPTY_BODY_HASH
        );
        assert_eq!(canonical, expected);
    }

    #[test]
    fn test_canonical_request_is_deterministic() {
        let mut req = crate::types::SignableRequest::new(
            "POST",
            "/users/",
            Some(br#"{"userId":"abc"}"#.to_vec()),
            "https://idx.example.com",
        )
        .unwrap();
        req.set_header("Content-Type", "application/json");
        req.set_header("Auth-Date", "20230101T000000Z");

        assert_eq!(canonical_request_string(&req), canonical_request_string(&req));
    }
}
