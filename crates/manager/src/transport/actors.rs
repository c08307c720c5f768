// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-facing actor routes: resolve the query, then dispatch inline
//! into the embedded runner or proxy to the remote one.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use warren::error::WarrenError;
use warren::protocol::{CachedSerializer, Encoding, ToClient};
use warren::transport::{error_response, handshake, headers};

use crate::query::{self, ActorQuery, ResolvedActor};

use super::{ManagerState, Routing};

async fn resolve_query(
    state: &ManagerState,
    header_map: &HeaderMap,
) -> Result<ResolvedActor, WarrenError> {
    let raw = header_map
        .get(headers::ACTOR_QUERY)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WarrenError::malformed("missing x-rivet-actor-query header"))?;
    let parsed = ActorQuery::parse(raw)?;
    query::resolve(state.driver.as_ref(), parsed).await
}

fn with_actor_header(header_map: &HeaderMap, actor_id: Uuid) -> HeaderMap {
    let mut headers = header_map.clone();
    if let Ok(value) = HeaderValue::from_str(&actor_id.to_string()) {
        headers.insert(headers::ACTOR, value);
    }
    headers
}

/// `POST /actors/action/{name}`.
pub async fn action(
    State(state): State<Arc<ManagerState>>,
    Path(name): Path<String>,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let encoding =
        warren::transport::encoding_from_headers(&header_map).unwrap_or(Encoding::Json);
    let resolved = match resolve_query(&state, &header_map).await {
        Ok(resolved) => resolved,
        Err(err) => return error_response(encoding, &err),
    };
    let actor_id = resolved.record.actor_id;
    match &state.routing {
        Routing::Inline { runner } => {
            let headers = with_actor_header(&header_map, actor_id);
            warren::transport::http::action(
                State(Arc::clone(runner)),
                Path(name),
                headers,
                body,
            )
            .await
        }
        Routing::Proxy { target } => {
            target
                .forward_http(Method::POST, &format!("/action/{name}"), &header_map, actor_id, body)
                .await
        }
    }
}

/// `POST /actors/message` — inject a frame into an SSE connection.
pub async fn connection_message(
    State(state): State<Arc<ManagerState>>,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let encoding =
        warren::transport::encoding_from_headers(&header_map).unwrap_or(Encoding::Json);
    let resolved = match resolve_query(&state, &header_map).await {
        Ok(resolved) => resolved,
        Err(err) => return error_response(encoding, &err),
    };
    let actor_id = resolved.record.actor_id;
    match &state.routing {
        Routing::Inline { runner } => {
            let headers = with_actor_header(&header_map, actor_id);
            warren::transport::http::connection_message(State(Arc::clone(runner)), headers, body)
                .await
        }
        Routing::Proxy { target } => {
            target
                .forward_http(Method::POST, "/connections/message", &header_map, actor_id, body)
                .await
        }
    }
}

/// `GET /actors/connect/sse`.
pub async fn connect_sse(
    State(state): State<Arc<ManagerState>>,
    header_map: HeaderMap,
) -> Response {
    let encoding =
        warren::transport::encoding_from_headers(&header_map).unwrap_or(Encoding::Json);
    let resolved = match resolve_query(&state, &header_map).await {
        Ok(resolved) => resolved,
        Err(err) => return sse_error(encoding, &err),
    };
    let actor_id = resolved.record.actor_id;
    match &state.routing {
        Routing::Inline { runner } => {
            let headers = with_actor_header(&header_map, actor_id);
            warren::transport::sse::sse_connect(State(Arc::clone(runner)), headers).await
        }
        Routing::Proxy { target } => {
            target
                .forward_http(Method::GET, "/connect/sse", &header_map, actor_id, Bytes::new())
                .await
        }
    }
}

/// `GET /actors/connect/websocket`.
///
/// The handshake rides in `Sec-WebSocket-Protocol`; the actor is named by
/// its `rivet_actor.<id>` tag (resolved earlier over HTTP).
pub async fn connect_websocket(
    State(state): State<Arc<ManagerState>>,
    header_map: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let protocol_header = header_map
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match &state.routing {
        Routing::Inline { runner } => {
            // The runner parses the handshake itself and reports failures
            // in-stream.
            warren::transport::ws::ws_connect(State(Arc::clone(runner)), header_map, ws)
                .await
                .into_response()
        }
        Routing::Proxy { target } => {
            let handshake = protocol_header
                .as_deref()
                .map(handshake::parse_protocols)
                .unwrap_or_else(|| Ok(handshake::WsHandshake::default()));
            let (encoding, actor_id) = match &handshake {
                Ok(parsed) => (parsed.encoding, parsed.actor_id),
                Err(_) => (Encoding::Json, None),
            };
            debug!(actor_id = ?actor_id, "proxying websocket connect");
            target.forward_websocket(
                "/connect/websocket",
                protocol_header,
                actor_id,
                encoding,
                state.cloudflare_compat,
                ws,
            )
        }
    }
}

/// `ALL /actors/raw/http/{*path}`.
pub async fn raw_http(
    State(state): State<Arc<ManagerState>>,
    Path(path): Path<String>,
    method: Method,
    uri: Uri,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let resolved = match resolve_query(&state, &header_map).await {
        Ok(resolved) => resolved,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    let actor_id = resolved.record.actor_id;
    match &state.routing {
        Routing::Inline { runner } => {
            let headers = with_actor_header(&header_map, actor_id);
            warren::transport::raw::raw_http(
                State(Arc::clone(runner)),
                Path(path),
                method,
                uri,
                headers,
                body,
            )
            .await
        }
        Routing::Proxy { target } => {
            let suffix = match uri.query() {
                Some(query) => format!("/raw/http/{path}?{query}"),
                None => format!("/raw/http/{path}"),
            };
            target.forward_http(method, &suffix, &header_map, actor_id, body).await
        }
    }
}

/// `GET /actors/raw/websocket/{*path}`.
pub async fn raw_websocket(
    State(state): State<Arc<ManagerState>>,
    Path(path): Path<String>,
    uri: Uri,
    header_map: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let resolved = match resolve_query(&state, &header_map).await {
        Ok(resolved) => resolved,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    let actor_id = resolved.record.actor_id;
    match &state.routing {
        Routing::Inline { runner } => {
            let headers = with_actor_header(&header_map, actor_id);
            warren::transport::raw::raw_websocket(
                State(Arc::clone(runner)),
                Path(path),
                uri,
                headers,
                ws,
            )
            .await
        }
        Routing::Proxy { target } => {
            let protocol_header = header_map
                .get("sec-websocket-protocol")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            target.forward_websocket(
                &format!("/raw/websocket/{path}"),
                protocol_header,
                Some(actor_id),
                Encoding::Json,
                state.cloudflare_compat,
                ws,
            )
        }
    }
}

/// SSE setup failures are delivered in-stream: one `Error` frame, then the
/// stream ends.
fn sse_error(encoding: Encoding, err: &WarrenError) -> Response {
    let frame = CachedSerializer::new(ToClient::error(err, false, None));
    let data = frame
        .serialize(encoding)
        .map(|bytes| encoding.frame_for_sse(&bytes))
        .unwrap_or_default();
    let stream =
        futures_util::stream::iter([Ok::<Event, Infallible>(Event::default().data(data))]);
    Sse::new(stream).into_response()
}
