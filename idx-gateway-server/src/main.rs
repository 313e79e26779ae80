//! IdentityX gateway server.
//!
//! Accepts arbitrary inbound HTTP requests, forwards each one to the
//! configured IdentityX service with Digest or Basic authentication attached,
//! and relays the verified response back to the caller as JSON. Every
//! response carries permissive CORS headers so browser front ends can talk
//! to the gateway directly.

mod config;

use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use idx_gateway_lib::{Dispatcher, GatewayError, UpstreamResponse};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

const CORS_METHODS: &str = "GET,PUT,PATCH,POST,DELETE,OPTIONS";
const CORS_HEADERS: &str = "Content-Type, Authorization";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install default crypto provider for rustls (required for upstream TLS)
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = config::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.clone())
        .init();

    let (gateway_config, credentials) = config::build_gateway(&args)?;
    let production = gateway_config.production;

    info!("Forwarding to {}", gateway_config.service_url);
    info!("Auth scheme: {:?}", gateway_config.auth_scheme);

    let dispatcher = Dispatcher::new(Arc::new(gateway_config), Arc::new(credentials));

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("Gateway listening on 0.0.0.0:{}", args.port);

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("Accepted connection from {}", addr);

        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move {
                    Ok::<_, Infallible>(handle_request(req, &dispatcher, production).await)
                }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

/// Handle one inbound request: collect it, dispatch upstream, relay the result.
async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    dispatcher: &Dispatcher,
    production: bool,
) -> hyper::Response<Full<Bytes>> {
    if req.method() == hyper::Method::OPTIONS {
        return json_response(StatusCode::OK, Vec::new());
    }

    let method = req.method().as_str().to_string();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    info!("{} {}", method, path_and_query);

    let body_bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Failed to read inbound body: {}", e);
            return json_response(
                StatusCode::BAD_REQUEST,
                error_body("Failed to read request body"),
            );
        }
    };
    let body = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes.to_vec())
    };

    let result = dispatcher.dispatch(&method, &path_and_query, body).await;
    render_result(result, production)
}

/// Turn a dispatch result into the response relayed to the inbound caller.
///
/// Successful upstream bodies are parsed and re-serialized as JSON so the
/// caller always receives well-formed JSON, never raw upstream bytes. Non-2xx
/// upstream responses are relayed with their original status and body.
fn render_result(
    result: idx_gateway_lib::Result<UpstreamResponse>,
    production: bool,
) -> hyper::Response<Full<Bytes>> {
    match result {
        Ok(upstream) => {
            let status =
                StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);
            if upstream.body.is_empty() {
                return json_response(status, Vec::new());
            }
            let reserialized = serde_json::from_slice::<serde_json::Value>(&upstream.body)
                .and_then(|value| serde_json::to_vec(&value));
            match reserialized {
                Ok(body) => json_response(status, body),
                Err(e) => internal_error(
                    &GatewayError::response_parse(format!(
                        "Upstream response was not valid JSON: {}",
                        e
                    )),
                    production,
                ),
            }
        }
        Err(GatewayError::Upstream { status, body }) => {
            info!("Upstream returned status {}", status);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            json_response(status, body)
        }
        Err(e) => internal_error(&e, production),
    }
}

/// Render a local failure as a 500 with a JSON error body.
///
/// In production mode the internal detail is replaced with a generic message.
fn internal_error(err: &GatewayError, production: bool) -> hyper::Response<Full<Bytes>> {
    error!("Request failed: {}", err);
    let message = if production {
        "Internal server error".to_string()
    } else {
        err.to_string()
    };
    json_response(StatusCode::INTERNAL_SERVER_ERROR, error_body(&message))
}

fn error_body(message: &str) -> Vec<u8> {
    serde_json::json!({ "error": message }).to_string().into_bytes()
}

/// Build a JSON response with permissive CORS headers attached.
fn json_response(status: StatusCode, body: Vec<u8>) -> hyper::Response<Full<Bytes>> {
    let response = hyper::Response::builder()
        .status(status)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", CORS_METHODS)
        .header("Access-Control-Allow-Headers", CORS_HEADERS)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)));

    match response {
        Ok(resp) => resp,
        // Static headers and a valid status cannot fail to build
        Err(e) => {
            error!("Failed to build response: {}", e);
            hyper::Response::new(Full::new(Bytes::new()))
        }
    }
}
