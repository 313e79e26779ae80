//! Gateway library: canonical-request signing and upstream dispatch.
//!
//! This library implements:
//! - Deterministic canonicalization of requests and responses
//! - HMAC-SHA256 signing with a scoped key-derivation chain
//! - RSA-protected shared-secret resolution
//! - Mutual authentication: signed requests, verified responses
//! - Dispatch of inbound calls to a fixed upstream service

pub mod canonical;
pub mod credentials;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod types;
pub mod verify;

pub use credentials::CredentialStore;
pub use dispatch::Dispatcher;
pub use error::{GatewayError, Result};
pub use types::{AuthScheme, GatewayConfig, SignableRequest, UpstreamResponse};
pub use verify::ParsedDigestAuth;
