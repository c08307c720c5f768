// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Raw passthrough: user-defined `on_fetch` / `on_websocket` handlers.
//! The `/raw/http` prefix is stripped before the request reaches user
//! code.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::definition::RawRequest;
use crate::error::WarrenError;
use crate::protocol::Encoding;
use crate::runner::Runner;

use super::error_response;

fn build_raw_request(
    method: &Method,
    path: &str,
    uri: &Uri,
    header_map: &HeaderMap,
    body: Bytes,
) -> RawRequest {
    let path = match uri.query() {
        Some(query) => format!("/{path}?{query}"),
        None => format!("/{path}"),
    };
    let headers = header_map
        .iter()
        .filter_map(|(name, value)| {
            value.to_str().ok().map(|v| (name.as_str().to_owned(), v.to_owned()))
        })
        .collect();
    RawRequest { method: method.to_string(), path, headers, body }
}

/// `ALL /raw/http/{*path}` — forward to the actor's `on_fetch`.
pub async fn raw_http(
    State(runner): State<Arc<Runner>>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let actor_id = super::actor_id_from_headers(&header_map)?;
        let instance = runner.require(actor_id).await?;
        let request = build_raw_request(&method, &path, &uri, &header_map, body);
        instance.handle_fetch(request).await
    }
    .await;

    match result {
        Ok(raw) => {
            let Ok(status) = StatusCode::from_u16(raw.status) else {
                return error_response(Encoding::Json, &invalid_fetch_response("status code"));
            };
            let mut builder = Response::builder().status(status);
            for (name, value) in &raw.headers {
                builder = builder.header(name, value);
            }
            builder.body(Body::from(raw.body)).unwrap_or_else(|_| {
                error_response(Encoding::Json, &invalid_fetch_response("headers"))
            })
        }
        Err(err) => {
            debug!("raw http failed: {err}");
            error_response(Encoding::Json, &err)
        }
    }
}

fn invalid_fetch_response(what: &str) -> WarrenError {
    WarrenError::new(
        crate::error::ErrorCode::InvalidFetchResponse,
        format!("on_fetch returned an invalid {what}"),
    )
}

/// `GET /raw/websocket/{*path}` — forward to the actor's `on_websocket`.
pub async fn raw_websocket(
    State(runner): State<Arc<Runner>>,
    Path(path): Path<String>,
    uri: Uri,
    header_map: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let resolved = async {
        let actor_id = super::actor_id_from_headers(&header_map)?;
        let instance = runner.require(actor_id).await?;
        // Probe before the upgrade so undefined handlers fail as plain HTTP.
        if instance.definition().on_websocket.is_none() {
            return Err(WarrenError::new(
                crate::error::ErrorCode::WebSocketNotDefined,
                "actor does not define on_websocket",
            ));
        }
        Ok(instance)
    }
    .await;

    match resolved {
        Ok(instance) => {
            let request =
                build_raw_request(&Method::GET, &path, &uri, &header_map, Bytes::new());
            ws.on_upgrade(move |socket| async move {
                if let Err(err) = instance.handle_websocket(socket, request).await {
                    warn!("raw websocket handler failed: {err}");
                }
            })
        }
        Err(err) => error_response(Encoding::Json, &err),
    }
}
