//! Server configuration: CLI arguments, properties file, and credential loading.
//!
//! Deployment-specific values (service URL, key id, encrypted shared secret,
//! Basic credentials) live in a Java-style properties file. Runtime knobs
//! (port, log level, timeout, auth scheme) come from CLI flags with
//! environment-variable fallbacks.

use anyhow::{anyhow, Context};
use clap::Parser;
use idx_gateway_lib::{AuthScheme, CredentialStore, GatewayConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "idx-gateway-server")]
#[command(author, version, about = "IdentityX authentication gateway", long_about = None)]
pub struct Args {
    /// Port to listen on
    #[arg(long, default_value = "3000", env = "IDX_GATEWAY_PORT")]
    pub port: u16,

    /// Log level
    #[arg(long, default_value = "info", env = "IDX_GATEWAY_LOG_LEVEL")]
    pub log_level: String,

    /// Path to the credential properties file
    #[arg(
        long,
        default_value = "config/credential.properties",
        env = "IDX_GATEWAY_CREDENTIALS"
    )]
    pub credentials: PathBuf,

    /// Path to the RSA private key PEM used to decrypt the shared secret
    #[arg(
        long,
        default_value = "config/private_key.pem",
        env = "IDX_GATEWAY_PRIVATE_KEY"
    )]
    pub private_key: PathBuf,

    /// Outbound authentication scheme: BASIC or DIGEST
    #[arg(long, default_value = "DIGEST", env = "IDX_GATEWAY_AUTH_SCHEME")]
    pub auth_scheme: String,

    /// Upstream request timeout in milliseconds
    #[arg(long, default_value = "3000", env = "IDX_GATEWAY_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Withhold internal error detail from inbound callers
    #[arg(long, env = "IDX_GATEWAY_PRODUCTION")]
    pub production: bool,
}

/// Parse a Java-style properties file into a key/value map.
///
/// Blank lines and lines starting with `#` are skipped. Values may contain
/// `=`; only the first one splits.
pub fn load_properties(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read properties file {}", path.display()))?;

    let mut properties = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            properties.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    Ok(properties)
}

fn required<'a>(
    properties: &'a HashMap<String, String>,
    key: &str,
    path: &Path,
) -> anyhow::Result<&'a str> {
    properties
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("Missing property '{}' in {}", key, path.display()))
}

/// Build the gateway configuration and credential store from parsed arguments.
pub fn build_gateway(args: &Args) -> anyhow::Result<(GatewayConfig, CredentialStore)> {
    let properties = load_properties(&args.credentials)?;
    let service_url = required(&properties, "service.url", &args.credentials)?;

    let auth_scheme: AuthScheme = args
        .auth_scheme
        .parse()
        .map_err(|e| anyhow!("{}", e))?;

    let mut config = GatewayConfig::new(service_url)
        .with_auth_scheme(auth_scheme)
        .with_upstream_timeout(Duration::from_millis(args.timeout_ms))
        .with_production(args.production);

    let credentials = match auth_scheme {
        AuthScheme::Basic => {
            let username = required(&properties, "basic.username", &args.credentials)?;
            let password = required(&properties, "basic.password", &args.credentials)?;
            config = config.with_basic_credentials(username, password);

            // The store is unused under Basic but the dispatcher still holds one
            CredentialStore::with_shared_secret("", Vec::new())
        }
        AuthScheme::Digest => {
            let key_id = required(&properties, "shared.key.id", &args.credentials)?;
            let encrypted_secret =
                required(&properties, "encrypted.shared.key", &args.credentials)?;
            let pem = std::fs::read_to_string(&args.private_key).with_context(|| {
                format!("Failed to read private key {}", args.private_key.display())
            })?;

            let store = CredentialStore::from_pem(key_id, encrypted_secret, &pem)?;
            // Resolve eagerly so bad key material fails at startup, not mid-request
            store.shared_secret().map(|_| ()).map_err(|e| anyhow!("{}", e))?;
            store
        }
    };

    Ok((config, credentials))
}
