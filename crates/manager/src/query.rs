// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor queries: how a client names the actor it wants.
//!
//! Queries arrive as JSON in the `x-rivet-actor-query` header (HTTP/SSE)
//! or pre-resolved as a `rivet_actor` protocol tag (WebSocket).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use warren::error::WarrenError;
use warren::protocol::{json, Value};

use crate::registry::{ActorRecord, ManagerDriver};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorQuery {
    #[serde(rename_all = "camelCase")]
    GetForId { name: String, actor_id: Uuid },
    #[serde(rename_all = "camelCase")]
    GetForKey { name: String, key: Vec<String> },
    #[serde(rename_all = "camelCase")]
    GetOrCreateForKey {
        name: String,
        key: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Create {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
}

impl ActorQuery {
    pub fn parse(raw: &str) -> Result<Self, WarrenError> {
        serde_json::from_str(raw)
            .map_err(|e| WarrenError::malformed(format!("invalid actor query: {e}")))
    }
}

/// A resolved query: the actor plus whether this call created it.
#[derive(Debug, Clone)]
pub struct ResolvedActor {
    pub record: ActorRecord,
    pub created: bool,
}

fn decode_input(input: Option<serde_json::Value>) -> Result<Option<Value>, WarrenError> {
    input.as_ref().map(json::value_from_json).transpose()
}

/// Resolve a query against the manager driver.
pub async fn resolve(
    driver: &dyn ManagerDriver,
    query: ActorQuery,
) -> Result<ResolvedActor, WarrenError> {
    match query {
        ActorQuery::GetForId { name, actor_id } => {
            let record = driver.get_for_id(&name, actor_id).await?;
            Ok(ResolvedActor { record, created: false })
        }
        ActorQuery::GetForKey { name, key } => {
            let record = driver
                .get_for_key(&name, &key)
                .await?
                .ok_or_else(|| WarrenError::actor_not_found(format!("{name}:{key:?}")))?;
            Ok(ResolvedActor { record, created: false })
        }
        ActorQuery::GetOrCreateForKey { name, key, input, region: _ } => {
            let (record, created) =
                driver.get_or_create_for_key(&name, &key, decode_input(input)?).await?;
            Ok(ResolvedActor { record, created })
        }
        ActorQuery::Create { name, key, input, region: _ } => {
            let record = driver.create(&name, key, decode_input(input)?).await?;
            Ok(ResolvedActor { record, created: true })
        }
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
