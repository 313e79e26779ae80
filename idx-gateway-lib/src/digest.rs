//! Digest signing: key-derivation chain and outbound header generation.
//!
//! The signing key is never the shared secret itself. It is scoped to a single
//! day and a single nonce through a chain of HMAC-SHA256 steps before it signs
//! anything:
//!
//! ```text
//! kDate    = HMAC-SHA256(sharedSecret, datestamp + "Digest")
//! kNonce   = HMAC-SHA256(kDate,        nonce)
//! kSigning = HMAC-SHA256(kNonce,       "digest_request")
//! signature = hex(HMAC-SHA256(kSigning, stringToSign))
//! ```
//!
//! The chain is deterministic: identical inputs always yield identical output,
//! which is what makes response verification possible on the other side.

use crate::canonical::{canonical_request_string, signed_headers_string, sorted_headers};
use crate::credentials::CredentialStore;
use crate::error::Result;
use crate::types::{
    SignableRequest, AUTHORIZATION_HEADER, AUTH_DATE_HEADER, CONTENT_TYPE_HEADER,
    CONTENT_TYPE_JSON, IDX_ORIGIN_HEADER,
};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Algorithm label, the first line of every string to sign.
pub const ALGORITHM: &str = "HMAC-SHA-256";

/// Purpose string terminating every signature scope.
pub const SCOPE_TERMINATOR: &str = "digest_request";

/// Suffix mixed into the date-key derivation step.
const DATE_KEY_SUFFIX: &str = "Digest";

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 and return the raw bytes.
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// The signature scope: `keyId/datestamp/nonce/digest_request`.
///
/// Binds a signature to a specific key, day, and nonce; emitted as the
/// `digestId` field of the Authorization header.
pub fn scope_id(key_id: &str, datestamp: &str, nonce: &str) -> String {
    format!("{}/{}/{}/{}", key_id, datestamp, nonce, SCOPE_TERMINATOR)
}

/// Build the string to sign:
///
/// ```text
/// HMAC-SHA-256
/// <timestamp>
/// <scope_id>
/// <hex(SHA256(canonical_string))>
/// ```
pub fn build_string_to_sign(timestamp: &str, scope_id: &str, canonical_hash_hex: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM, timestamp, scope_id, canonical_hash_hex
    )
}

/// Run the four-step derivation chain and sign `string_to_sign`.
///
/// Returns the signature as lowercase hex.
pub fn derive_signature(
    shared_secret: &[u8],
    string_to_sign: &str,
    datestamp: &str,
    nonce: &str,
) -> String {
    let k_date = hmac_sha256(
        shared_secret,
        format!("{}{}", datestamp, DATE_KEY_SUFFIX).as_bytes(),
    );
    let k_nonce = hmac_sha256(&k_date, nonce.as_bytes());
    let k_signing = hmac_sha256(&k_nonce, SCOPE_TERMINATOR.as_bytes());
    hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes()))
}

/// Assemble the `Authorization` header value from its three fields.
pub fn build_digest_auth_header(
    scope_id: &str,
    signed_headers: &str,
    signature: &str,
) -> String {
    format!(
        "Digest digestId={}, digestSignedHeaders={}, digestSignature={}",
        scope_id, signed_headers, signature
    )
}

/// Sign an outbound request in place.
///
/// Attaches `Content-Type`, `Auth-Date`, and `X-IdxOrigin`, canonicalizes the
/// resulting header set, derives the signature, and sets the `Authorization`
/// header. The Authorization header itself is never part of the signed set.
pub fn sign_request(req: &mut SignableRequest, credentials: &CredentialStore) -> Result<()> {
    req.set_header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON);
    req.set_header(AUTH_DATE_HEADER, req.timestamp.clone());
    req.set_header(IDX_ORIGIN_HEADER, req.canonical_resource_url());

    let canonical = canonical_request_string(req);
    debug!(canonical_request = %canonical, "Built canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    let scope = scope_id(credentials.key_id(), &req.datestamp, &req.nonce);
    let string_to_sign = build_string_to_sign(&req.timestamp, &scope, &canonical_hash);
    debug!(string_to_sign = %string_to_sign, "Built string to sign");

    let signature = derive_signature(
        credentials.shared_secret()?,
        &string_to_sign,
        &req.datestamp,
        &req.nonce,
    );

    let signed_headers = signed_headers_string(&sorted_headers(&req.headers));
    req.set_header(
        AUTHORIZATION_HEADER,
        build_digest_auth_header(&scope, &signed_headers, &signature),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::header_value;

    fn test_credentials() -> CredentialStore {
        CredentialStore::with_shared_secret("w-5dYEsf6JLWgY4Mv3k9EQ", b"test-secret".to_vec())
    }

    #[test]
    fn test_scope_id_format() {
        let scope = scope_id(
            "w-5dYEsf6JLWgY4Mv3k9EQ",
            "20170818",
            "7e494974-77f8-4d04-ad83-2fca746eb690",
        );
        assert_eq!(
            scope,
            "w-5dYEsf6JLWgY4Mv3k9EQ/20170818/7e494974-77f8-4d04-ad83-2fca746eb690/digest_request"
        );
    }

    #[test]
    fn test_build_string_to_sign_layout() {
        let sts = build_string_to_sign(
            "20170818T000853Z",
            "key/20170818/nonce/digest_request",
            "74fa47f2cc315dd57e54fd60e02e04f6eb5d40e93a076e46dff35451bbb26a42",
        );
        assert_eq!(
            sts,
            "HMAC-SHA-256\n20170818T000853Z\nkey/20170818/nonce/digest_request\n\
             74fa47f2cc315dd57e54fd60e02e04f6eb5d40e93a076e46dff35451bbb26a42"
        );
    }

    #[test]
    fn test_derive_signature_deterministic() {
        let a = derive_signature(b"secret", "string-to-sign", "20230101", "nonce-1");
        let b = derive_signature(b"secret", "string-to-sign", "20230101", "nonce-1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_uppercase()));
    }

    #[test]
    fn test_derive_signature_scoped_to_inputs() {
        let base = derive_signature(b"secret", "sts", "20230101", "nonce-1");
        assert_ne!(base, derive_signature(b"other", "sts", "20230101", "nonce-1"));
        assert_ne!(base, derive_signature(b"secret", "sts2", "20230101", "nonce-1"));
        assert_ne!(base, derive_signature(b"secret", "sts", "20230102", "nonce-1"));
        assert_ne!(base, derive_signature(b"secret", "sts", "20230101", "nonce-2"));
    }

    #[test]
    fn test_sign_request_attaches_headers() {
        let creds = test_credentials();
        let mut req = SignableRequest::new(
            "POST",
            "/users/",
            Some(br#"{"userId":"abc"}"#.to_vec()),
            "https://idx.example.com",
        )
        .unwrap();

        sign_request(&mut req, &creds).unwrap();

        assert_eq!(
            header_value(&req.headers, "content-type"),
            Some("application/json")
        );
        assert_eq!(
            header_value(&req.headers, "auth-date"),
            Some(req.timestamp.as_str())
        );
        assert_eq!(
            header_value(&req.headers, "x-idxorigin"),
            Some("https://idx.example.com/users/")
        );

        let auth = header_value(&req.headers, "authorization").expect("authorization set");
        assert!(auth.starts_with("Digest digestId="));
        assert!(auth.contains(&format!(
            "digestId=w-5dYEsf6JLWgY4Mv3k9EQ/{}/{}/digest_request",
            req.datestamp, req.nonce
        )));
        assert!(auth.contains("digestSignedHeaders=auth-date;content-type;x-idxorigin"));
        assert!(auth.contains("digestSignature="));
    }

    #[test]
    fn test_sign_request_is_deterministic_for_fixed_inputs() {
        let creds = test_credentials();
        let mut a = SignableRequest::new("GET", "/users/", None, "https://idx.example.com").unwrap();

        // Pin the per-request fields so both signatures see identical input
        let mut b = a.clone();

        sign_request(&mut a, &creds).unwrap();
        sign_request(&mut b, &creds).unwrap();

        assert_eq!(
            header_value(&a.headers, "authorization"),
            header_value(&b.headers, "authorization")
        );
    }

    #[test]
    fn test_authorization_header_not_signed() {
        let creds = test_credentials();
        let mut req =
            SignableRequest::new("GET", "/users/", None, "https://idx.example.com").unwrap();
        sign_request(&mut req, &creds).unwrap();

        let auth = header_value(&req.headers, "authorization").unwrap();
        let signed = auth
            .split("digestSignedHeaders=")
            .nth(1)
            .unwrap()
            .split(", digestSignature=")
            .next()
            .unwrap();
        assert!(!signed.contains("authorization"));
    }
}
