// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor-facing HTTP surface: router and shared request plumbing for the
//! WebSocket, SSE, HTTP-action, and raw passthrough transports.

pub mod handshake;
pub mod http;
pub mod raw;
pub mod sse;
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::error::WarrenError;
use crate::protocol::{json, Encoding, Value};
use crate::runner::Runner;

/// Stable header names shared with the manager gateway.
pub mod headers {
    pub const TARGET: &str = "x-rivet-target";
    pub const ACTOR: &str = "x-rivet-actor";
    pub const ACTOR_QUERY: &str = "x-rivet-actor-query";
    pub const ENCODING: &str = "x-rivet-encoding";
    pub const CONN: &str = "x-rivet-conn";
    pub const CONN_PARAMS: &str = "x-rivet-conn-params";
    pub const CONN_TOKEN: &str = "x-rivet-conn-token";
    pub const TOKEN: &str = "x-rivet-token";
}

/// Build the per-runner axum router.
pub fn build_router(runner: Arc<Runner>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/connect/websocket", get(ws::ws_connect))
        .route("/connect/sse", get(sse::sse_connect))
        .route("/action/{name}", post(http::action))
        .route("/connections/message", post(http::connection_message))
        .route("/raw/http/{*path}", any(raw::raw_http))
        .route("/raw/websocket/{*path}", get(raw::raw_websocket))
        .layer(CorsLayer::permissive())
        .with_state(runner)
}

/// Bind and serve the runner surface; returns the bound address.
pub async fn spawn_server(
    config: &RunnerConfig,
    runner: Arc<Runner>,
    shutdown: CancellationToken,
) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    let router = build_router(runner);
    info!("runner listening on {addr}");
    tokio::spawn(async move {
        let result =
            axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await;
        if let Err(e) = result {
            error!("runner server error: {e}");
        }
    });
    Ok(addr)
}

async fn banner() -> &'static str {
    "warren runner"
}

async fn health() -> &'static str {
    "ok"
}

// -- Header plumbing ----------------------------------------------------------

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Negotiated encoding; absent header means JSON.
pub fn encoding_from_headers(headers: &HeaderMap) -> Result<Encoding, WarrenError> {
    match header_str(headers, headers::ENCODING) {
        Some(raw) => raw.parse(),
        None => Ok(Encoding::Json),
    }
}

/// The target actor id (`x-rivet-actor`).
pub fn actor_id_from_headers(headers: &HeaderMap) -> Result<Uuid, WarrenError> {
    let raw = header_str(headers, headers::ACTOR)
        .ok_or_else(|| WarrenError::malformed("missing x-rivet-actor header"))?;
    Uuid::parse_str(raw).map_err(|e| WarrenError::malformed(format!("invalid actor id: {e}")))
}

/// Connection params from `x-rivet-conn-params` (urlencoded JSON), with the
/// size limit enforced on the raw header value.
pub fn conn_params_from_headers(
    headers: &HeaderMap,
    max_size: usize,
) -> Result<Value, WarrenError> {
    let Some(raw) = header_str(headers, headers::CONN_PARAMS) else {
        return Ok(Value::Null);
    };
    if raw.len() > max_size {
        return Err(WarrenError::params_too_long(raw.len(), max_size));
    }
    decode_conn_params(raw)
}

/// Decode urlencoded-JSON connection params.
pub fn decode_conn_params(raw: &str) -> Result<Value, WarrenError> {
    let decoded = urlencoding::decode(raw)
        .map_err(|e| WarrenError::new(crate::error::ErrorCode::ParamsInvalid, e.to_string()))?;
    let parsed: serde_json::Value = serde_json::from_str(&decoded).map_err(|e| {
        WarrenError::new(crate::error::ErrorCode::ParamsInvalid, format!("invalid params: {e}"))
    })?;
    json::value_from_json(&parsed)
}

/// Reconnect credentials from `x-rivet-conn` / `x-rivet-conn-token`.
pub fn reconnect_from_headers(
    headers: &HeaderMap,
) -> Result<Option<(Uuid, String)>, WarrenError> {
    let Some(conn) = header_str(headers, headers::CONN) else { return Ok(None) };
    let conn_id = Uuid::parse_str(conn)
        .map_err(|e| WarrenError::malformed(format!("invalid conn id: {e}")))?;
    let token = header_str(headers, headers::CONN_TOKEN)
        .ok_or_else(|| WarrenError::malformed("x-rivet-conn without x-rivet-conn-token"))?;
    Ok(Some((conn_id, token.to_owned())))
}

/// Serialize an error in the request's encoding with its mapped status.
pub fn error_response(encoding: Encoding, err: &WarrenError) -> Response {
    let body = encoding.encode_http_error(&err.for_wire(false));
    let content_type = match encoding {
        Encoding::Json => "application/json",
        _ => "application/octet-stream",
    };
    Response::builder()
        .status(err.http_status())
        .header("content-type", content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
