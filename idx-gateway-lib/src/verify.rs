//! Response verification for Digest-authenticated upstream calls.
//!
//! A verified response carries its own `Authorization` header in the same
//! Digest format the gateway sends. The gateway recomputes the signature from
//! the response bytes and the shared secret, using the scope and signed-header
//! list the upstream declared, and rejects the response on any mismatch.

use crate::canonical::canonical_response_string;
use crate::credentials::CredentialStore;
use crate::digest::{build_string_to_sign, derive_signature};
use crate::error::{GatewayError, Result};
use crate::types::{header_value, AUTHORIZATION_HEADER, AUTH_DATE_HEADER};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use subtle::ConstantTimeEq;
use tracing::debug;

/// The three fields of a Digest Authorization header, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDigestAuth {
    /// Full scope string as declared: `keyId/datestamp/nonce/digest_request`
    pub scope_id: String,
    pub key_id: String,
    pub datestamp: String,
    pub nonce: String,
    /// Signed header names in declared order
    pub signed_headers: Vec<String>,
    /// Lowercase hex signature
    pub signature: String,
}

/// Parse a `Digest digestId=..., digestSignedHeaders=..., digestSignature=...`
/// header value.
///
/// All three fields must be present; the scope must have exactly four
/// `/`-separated components ending in `digest_request`.
pub fn parse_digest_header(value: &str) -> Result<ParsedDigestAuth> {
    let scope_id = extract_between(value, "digestId=", ", digestSignedHeaders")
        .ok_or_else(|| GatewayError::malformed_auth_header("Missing digestId field"))?;
    let signed_list = extract_between(value, "digestSignedHeaders=", ", digestSignature")
        .ok_or_else(|| GatewayError::malformed_auth_header("Missing digestSignedHeaders field"))?;
    let signature = value
        .split("digestSignature=")
        .nth(1)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::malformed_auth_header("Missing digestSignature field"))?;

    let parts: Vec<&str> = scope_id.split('/').collect();
    if parts.len() != 4 || parts[3] != crate::digest::SCOPE_TERMINATOR {
        return Err(GatewayError::malformed_auth_header(format!(
            "Invalid digestId scope: {}",
            scope_id
        )));
    }

    let signed_headers: Vec<String> = signed_list
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();

    Ok(ParsedDigestAuth {
        key_id: parts[0].to_string(),
        datestamp: parts[1].to_string(),
        nonce: parts[2].to_string(),
        scope_id: scope_id.to_string(),
        signed_headers,
        signature: signature.to_string(),
    })
}

fn extract_between<'a>(value: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let after = value.split(start).nth(1)?;
    let field = after.split(end).next()?.trim();
    if field.is_empty() {
        None
    } else {
        Some(field)
    }
}

/// Verify a Digest-signed upstream response.
///
/// Recomputes the signature over the status, the declared signed headers (in
/// declared order, absent headers contributing an empty value), and the body
/// hash, then compares against the supplied signature in constant time.
pub fn verify_response(
    status: u16,
    headers: &HashMap<String, String>,
    body: &[u8],
    credentials: &CredentialStore,
) -> Result<()> {
    let auth = header_value(headers, AUTHORIZATION_HEADER).ok_or_else(|| {
        GatewayError::malformed_auth_header("Response has no Authorization header")
    })?;
    let parsed = parse_digest_header(auth)?;

    let timestamp = header_value(headers, AUTH_DATE_HEADER).ok_or_else(|| {
        GatewayError::malformed_auth_header("Response has no Auth-Date header")
    })?;

    let signed_pairs: Vec<(String, String)> = parsed
        .signed_headers
        .iter()
        .map(|name| {
            let value = header_value(headers, name).unwrap_or("");
            (name.clone(), value.to_string())
        })
        .collect();

    let canonical = canonical_response_string(status, &signed_pairs, body);
    debug!(canonical_response = %canonical, "Built canonical response");

    let canonical_hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    let string_to_sign = build_string_to_sign(timestamp, &parsed.scope_id, &canonical_hash);

    let expected = derive_signature(
        credentials.shared_secret()?,
        &string_to_sign,
        &parsed.datestamp,
        &parsed.nonce,
    );

    if expected.as_bytes().ct_eq(parsed.signature.as_bytes()).into() {
        Ok(())
    } else {
        Err(GatewayError::SignatureMismatch)
    }
}
