// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-shot HTTP action calls and message injection for SSE connections.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::debug;
use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::{Encoding, HttpActionResponse};
use crate::runner::Runner;

use super::{error_response, headers};

/// `POST /action/{name}` — invoke one action without a persistent
/// connection.
pub async fn action(
    State(runner): State<Arc<Runner>>,
    Path(name): Path<String>,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let encoding = match super::encoding_from_headers(&header_map) {
        Ok(encoding) => encoding,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    match action_inner(&runner, &name, &header_map, encoding, body).await {
        Ok(response) => response,
        Err(err) => {
            debug!(action = %name, "http action failed: {err}");
            error_response(encoding, &err)
        }
    }
}

async fn action_inner(
    runner: &Arc<Runner>,
    name: &str,
    header_map: &HeaderMap,
    encoding: Encoding,
    body: Bytes,
) -> Result<Response, WarrenError> {
    let actor_id = super::actor_id_from_headers(header_map)?;
    let instance = runner.require(actor_id).await?;
    let opts = instance.options();

    if body.len() > opts.max_incoming_message_size {
        return Err(WarrenError::message_too_long(body.len(), opts.max_incoming_message_size));
    }
    let params = super::conn_params_from_headers(header_map, opts.max_connection_params_size)?;
    let request = encoding.decode_http_request(&body)?;

    let output = instance.handle_action(name, request.args, params).await?;
    let body = encoding.encode_http_response(&HttpActionResponse { output })?;
    let content_type = match encoding {
        Encoding::Json => "application/json",
        _ => "application/octet-stream",
    };
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(Body::from(body))
        .map_err(|e| WarrenError::internal(format!("response build: {e}")))
}

/// `POST /connections/message` — inject a ToServer frame over an existing
/// SSE connection. `(conn_id, token)` headers are the sole authentication.
pub async fn connection_message(
    State(runner): State<Arc<Runner>>,
    header_map: HeaderMap,
    body: Bytes,
) -> Response {
    let encoding = match super::encoding_from_headers(&header_map) {
        Ok(encoding) => encoding,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    match message_inner(&runner, &header_map, encoding, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(encoding, &err),
    }
}

async fn message_inner(
    runner: &Arc<Runner>,
    header_map: &HeaderMap,
    encoding: Encoding,
    body: Bytes,
) -> Result<(), WarrenError> {
    let actor_id = super::actor_id_from_headers(header_map)?;
    let (conn_id, token) = conn_credentials(header_map)?;

    let instance = runner.require(actor_id).await?;
    instance.authorize_conn(conn_id, &token).await?;

    let max = instance.options().max_incoming_message_size;
    if body.len() > max {
        return Err(WarrenError::message_too_long(body.len(), max));
    }
    let msg = encoding.decode_to_server(&body)?;
    instance.process_message(conn_id, msg).await
}

fn conn_credentials(header_map: &HeaderMap) -> Result<(Uuid, String), WarrenError> {
    let conn = super::header_str(header_map, headers::CONN)
        .ok_or_else(|| WarrenError::malformed("missing x-rivet-conn header"))?;
    let conn_id = Uuid::parse_str(conn)
        .map_err(|e| WarrenError::malformed(format!("invalid conn id: {e}")))?;
    let token = super::header_str(header_map, headers::CONN_TOKEN)
        .ok_or_else(|| WarrenError::malformed("missing x-rivet-conn-token header"))?;
    Ok((conn_id, token.to_owned()))
}
