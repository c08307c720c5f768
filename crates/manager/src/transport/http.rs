// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager control-plane endpoints (all JSON).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use warren::error::{ErrorCode, WarrenError};
use warren::protocol::{json as json_codec, Encoding};
use warren::transport::error_response;

use crate::query::ActorQuery;
use crate::registry::{ActorRecord, ListFilter};

use super::ManagerState;

const RUNTIME: &str = "warren";
const MAX_ID_FILTER: usize = 32;

pub async fn banner() -> &'static str {
    "warren manager"
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "runtime": RUNTIME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn metadata(State(state): State<Arc<ManagerState>>) -> Json<serde_json::Value> {
    let kind = if state.serverless { json!({"serverless": {}}) } else { json!({"normal": {}}) };
    let mut body = json!({
        "runtime": RUNTIME,
        "version": env!("CARGO_PKG_VERSION"),
        "runner": {"kind": kind},
        "actorNames": state.actor_names,
    });
    if let Some(endpoint) = &state.client_endpoint {
        body["clientEndpoint"] = json!(endpoint);
    }
    Json(body)
}

/// Query string for `GET /actors`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub name: Option<String>,
    /// Comma-separated actor ids.
    pub actor_ids: Option<String>,
    /// JSON array of key parts.
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub actors: Vec<ActorRecord>,
}

/// `GET /actors` — list with mutually-exclusive filters.
pub async fn list_actors(
    State(state): State<Arc<ManagerState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = match build_filter(&query) {
        Ok(filter) => filter,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    match state.driver.list(filter).await {
        Ok(actors) => Json(ListResponse { actors }).into_response(),
        Err(err) => error_response(Encoding::Json, &err),
    }
}

fn build_filter(query: &ListQuery) -> Result<ListFilter, WarrenError> {
    let invalid = |msg: &str| WarrenError::new(ErrorCode::ActionInvalidRequest, msg.to_owned());
    if let Some(raw_ids) = &query.actor_ids {
        if query.name.is_some() || query.key.is_some() {
            return Err(invalid("actor_ids cannot be combined with name or key filters"));
        }
        let ids = raw_ids
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s.trim())
                    .map_err(|e| invalid(&format!("invalid actor id {s}: {e}")))
            })
            .collect::<Result<Vec<Uuid>, WarrenError>>()?;
        if ids.len() > MAX_ID_FILTER {
            return Err(invalid("at most 32 actor ids per request"));
        }
        return Ok(ListFilter { actor_ids: ids, ..ListFilter::default() });
    }
    let key = match &query.key {
        Some(raw) => Some(
            serde_json::from_str::<Vec<String>>(raw)
                .map_err(|e| invalid(&format!("invalid key filter: {e}")))?,
        ),
        None => None,
    };
    if key.is_some() && query.name.is_none() {
        return Err(invalid("key filter requires a name filter"));
    }
    Ok(ListFilter { name: query.name.clone(), key, actor_ids: Vec::new() })
}

#[derive(Debug, Deserialize)]
pub struct GetOrCreateBody {
    pub name: String,
    pub key: Vec<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub actor: ActorRecord,
    pub created: bool,
}

/// `PUT /actors` — get-or-create by key.
pub async fn get_or_create_actor(
    State(state): State<Arc<ManagerState>>,
    Json(body): Json<GetOrCreateBody>,
) -> Response {
    let query = ActorQuery::GetOrCreateForKey {
        name: body.name,
        key: body.key,
        input: body.input,
        region: None,
    };
    match crate::query::resolve(state.driver.as_ref(), query).await {
        Ok(resolved) => {
            if resolved.created {
                info!(actor_id = %resolved.record.actor_id, name = %resolved.record.name, "actor created");
            }
            Json(ResolveResponse { actor: resolved.record, created: resolved.created })
                .into_response()
        }
        Err(err) => error_response(Encoding::Json, &err),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub name: String,
    #[serde(default)]
    pub key: Option<Vec<String>>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// `POST /actors` — always create.
pub async fn create_actor(
    State(state): State<Arc<ManagerState>>,
    Json(body): Json<CreateBody>,
) -> Response {
    let input = match body.input.as_ref().map(json_codec::value_from_json).transpose() {
        Ok(input) => input,
        Err(err) => return error_response(Encoding::Json, &err),
    };
    match state.driver.create(&body.name, body.key, input).await {
        Ok(actor) => {
            info!(actor_id = %actor.actor_id, name = %actor.name, "actor created");
            Json(json!({"actor": actor})).into_response()
        }
        Err(err) => error_response(Encoding::Json, &err),
    }
}

/// Headers a serverless worker binds itself with.
const START_HEADERS: [&str; 5] = [
    "x-rivet-endpoint",
    "x-rivet-token",
    "x-rivet-total-slots",
    "x-rivet-runner-name",
    "x-rivet-namespace-id",
];

/// `GET /start` — serverless worker registration handshake. Spawning the
/// engine-bound worker itself is the supervisor's job.
pub async fn serverless_start(
    State(state): State<Arc<ManagerState>>,
    headers: HeaderMap,
) -> Response {
    if !state.serverless {
        let err = WarrenError::new(
            ErrorCode::ActionInvalidRequest,
            "serverless mode is not enabled",
        );
        return error_response(Encoding::Json, &err);
    }
    for name in START_HEADERS {
        if !headers.contains_key(name) {
            let err =
                WarrenError::new(ErrorCode::ParamsInvalid, format!("missing {name} header"));
            return error_response(Encoding::Json, &err);
        }
    }
    Json(json!({"ok": true})).into_response()
}
