//! Dispatch orchestrator: the one path every inbound request takes upstream.
//!
//! For each inbound call the dispatcher builds a signable request bound to the
//! configured service host, attaches Basic or Digest authentication, sends it
//! over a fresh HTTP/1.1 connection (TLS when the service URL is https), and
//! verifies the response signature before handing anything back. The whole
//! exchange runs under a single timeout; on expiry the request is abandoned.

use crate::credentials::CredentialStore;
use crate::digest::sign_request;
use crate::error::{GatewayError, Result};
use crate::types::{
    parse_service_url, AuthScheme, GatewayConfig, SignableRequest, UpstreamResponse,
    AUTHORIZATION_HEADER, CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON,
};
use crate::verify::verify_response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Sends authenticated requests to the configured upstream service.
///
/// Cheap to clone; shared across all inbound connections.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<GatewayConfig>,
    credentials: Arc<CredentialStore>,
}

impl Dispatcher {
    pub fn new(config: Arc<GatewayConfig>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// Forward one inbound request upstream and return the verified response.
    ///
    /// `path_and_query` is the inbound request's original path and query,
    /// leading `/` included. Only the scheme and host of the configured
    /// service URL are used; its path component does not participate.
    ///
    /// Non-2xx upstream statuses return `GatewayError::Upstream` carrying the
    /// original status and body, and skip signature verification. 2xx
    /// responses under the Digest scheme must verify or the response is
    /// rejected.
    pub async fn dispatch(
        &self,
        method: &str,
        path_and_query: &str,
        body: Option<Vec<u8>>,
    ) -> Result<UpstreamResponse> {
        let mut req =
            SignableRequest::new(method, path_and_query, body, &self.config.service_url)?;

        match self.config.auth_scheme {
            AuthScheme::Basic => {
                let token = BASE64.encode(format!(
                    "{}:{}",
                    self.config.basic_username, self.config.basic_password
                ));
                req.set_header(CONTENT_TYPE_HEADER, CONTENT_TYPE_JSON);
                req.set_header(AUTHORIZATION_HEADER, format!("Basic {}", token));
            }
            AuthScheme::Digest => {
                sign_request(&mut req, &self.credentials)?;
            }
        }

        debug!(method = %req.method, uri = %req.uri(), "Dispatching upstream request");

        let response = tokio::time::timeout(self.config.upstream_timeout, self.send(&req))
            .await
            .map_err(|_| {
                GatewayError::transport(format!(
                    "Upstream request timed out after {}ms",
                    self.config.upstream_timeout.as_millis()
                ))
            })??;

        if !(200..300).contains(&response.status) {
            return Err(GatewayError::Upstream {
                status: response.status,
                body: response.body,
            });
        }

        if self.config.auth_scheme == AuthScheme::Digest {
            verify_response(
                response.status,
                &response.headers,
                &response.body,
                &self.credentials,
            )?;
            debug!(status = response.status, "Upstream response signature verified");
        }

        Ok(response)
    }

    /// Send the prepared request over a fresh HTTP/1.1 connection.
    async fn send(&self, req: &SignableRequest) -> Result<UpstreamResponse> {
        let (scheme, authority) = parse_service_url(&self.config.service_url)?;

        let default_port = if scheme == "https" { 443 } else { 80 };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (
                h,
                p.parse::<u16>().map_err(|_| {
                    GatewayError::config(format!("Invalid port in service URL: {}", p))
                })?,
            ),
            None => (authority, default_port),
        };

        let tcp_stream = TcpStream::connect((host, port)).await.map_err(|e| {
            GatewayError::transport(format!("Failed to connect to {}:{}: {}", host, port, e))
        })?;

        if scheme == "https" {
            let root_certs = rustls::RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            let client_config = rustls::ClientConfig::builder()
                .with_root_certificates(root_certs)
                .with_no_client_auth();
            let connector = TlsConnector::from(Arc::new(client_config));

            let server_name = ServerName::try_from(host.to_string()).map_err(|_| {
                GatewayError::config(format!("Invalid server name: {}", host))
            })?;
            let tls_stream = connector.connect(server_name, tcp_stream).await.map_err(|e| {
                GatewayError::transport(format!("Failed to establish upstream TLS: {}", e))
            })?;

            self.exchange(req, authority, tls_stream).await
        } else {
            self.exchange(req, authority, tcp_stream).await
        }
    }

    /// Run a single request/response exchange over an established stream.
    async fn exchange<S>(
        &self,
        req: &SignableRequest,
        authority: &str,
        stream: S,
    ) -> Result<UpstreamResponse>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
        tokio::spawn(async move {
            let _ = conn.await;
        });

        // Origin-form URI: the connection is already bound to the host
        let path_and_query = format!("{}{}", req.resource_path, req.query_string);

        let mut builder = hyper::Request::builder()
            .method(req.method.as_str())
            .uri(&path_and_query)
            .header(hyper::header::HOST, authority);

        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let body = Bytes::from(req.body.clone().unwrap_or_default());
        let hyper_req = builder.body(Full::new(body))?;

        let resp = sender.send_request(hyper_req).await?;

        let status = resp.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }

        let body = resp.into_body().collect().await?.to_bytes().to_vec();

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
