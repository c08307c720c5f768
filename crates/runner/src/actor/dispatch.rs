// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action dispatch: name lookup, deadline race, response transform.

use std::sync::Arc;

use tokio::time::timeout;
use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::Value;

use super::instance::ActorInstance;
use super::{ActionContext, ActorContext};

/// Invoke a named action against the actor.
///
/// Unknown names fail with `action/not_found`; the handler races the
/// per-actor action timeout; the result feeds through
/// `on_before_action_response` when defined. Returning — success or not —
/// arms the throttled persist writer.
pub async fn invoke(
    instance: &Arc<ActorInstance>,
    conn_id: Option<Uuid>,
    name: &str,
    args: Value,
) -> Result<Value, WarrenError> {
    let result = invoke_inner(instance, conn_id, name, args).await;
    instance.arm_save();
    result
}

async fn invoke_inner(
    instance: &Arc<ActorInstance>,
    conn_id: Option<Uuid>,
    name: &str,
    args: Value,
) -> Result<Value, WarrenError> {
    let handler = instance
        .definition()
        .actions
        .get(name)
        .cloned()
        .ok_or_else(|| WarrenError::action_not_found(name))?;

    let ctx = ActionContext::new(ActorContext::new(Arc::clone(instance)), conn_id);
    let deadline = instance.options().action_timeout;

    let output = match timeout(deadline, handler(ctx.clone(), args)).await {
        Ok(result) => result?,
        Err(_) => return Err(WarrenError::action_timed_out(name)),
    };

    match &instance.definition().on_before_action_response {
        Some(transform) => transform(ctx, name.to_owned(), output).await,
        None => Ok(output),
    }
}
