//! Error types for the gateway
//!
//! Provides a unified error type that covers all failure modes across
//! credential resolution, signing, transport, and response verification.

use thiserror::Error;

/// Result type alias using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Comprehensive error type for all gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// IO errors (file operations, network)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key material unreadable or undecryptable
    #[error("Credential error: {0}")]
    Credential(String),

    /// Configured auth scheme is neither BASIC nor DIGEST
    #[error("Unsupported authentication type: {0}")]
    UnsupportedAuthScheme(String),

    /// Upstream Authorization header missing or missing required sub-fields
    #[error("Malformed Authorization header: {0}")]
    MalformedAuthHeader(String),

    /// Recomputed response signature does not match the one supplied
    #[error("Response signature does not match generated signature")]
    SignatureMismatch,

    /// Timeout or connection failure on the outbound call
    #[error("Transport error: {0}")]
    Transport(String),

    /// Upstream returned a non-2xx status; carries the original status and body
    #[error("Upstream error: status {status}")]
    Upstream { status: u16, body: Vec<u8> },

    /// Upstream body was not valid JSON where JSON was expected
    #[error("Response parse error: {0}")]
    ResponseParse(String),

    /// Protocol errors (invalid method, URI, header value)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors with context
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    /// Create a credential error with context
    pub fn credential(msg: impl Into<String>) -> Self {
        Self::Credential(msg.into())
    }

    /// Create a malformed-auth-header error with context
    pub fn malformed_auth_header(msg: impl Into<String>) -> Self {
        Self::MalformedAuthHeader(msg.into())
    }

    /// Create a transport error with context
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a response parse error with context
    pub fn response_parse(msg: impl Into<String>) -> Self {
        Self::ResponseParse(msg.into())
    }

    /// Create a config error with context
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl From<hyper::Error> for GatewayError {
    fn from(e: hyper::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<http::Error> for GatewayError {
    fn from(e: http::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}
