// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor runtime: one [`ActorInstance`] per live actor plus the contexts
//! handed to user hooks and action handlers.
//!
//! Contexts hold an `Arc` to the instance and look everything up through
//! it by id; no long-lived back-pointers exist between the instance, its
//! connections, and user code.

pub mod conn;
pub mod dispatch;
pub mod instance;
pub mod schedule;
pub mod socket;
pub mod state;

pub use instance::ActorInstance;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::Value;

/// Handle to the owning actor, passed to lifecycle hooks.
#[derive(Clone)]
pub struct ActorContext {
    instance: Arc<ActorInstance>,
}

impl ActorContext {
    pub(crate) fn new(instance: Arc<ActorInstance>) -> Self {
        Self { instance }
    }

    pub fn actor_id(&self) -> Uuid {
        self.instance.actor_id()
    }

    pub fn name(&self) -> &str {
        self.instance.name()
    }

    pub fn key(&self) -> &[String] {
        self.instance.key()
    }

    /// The creation input, if one was provided.
    pub async fn input(&self) -> Option<Value> {
        self.instance.input().await
    }

    /// A snapshot of the current state.
    pub async fn state(&self) -> Value {
        self.instance.state_snapshot().await
    }

    /// Mutate state through the change-detecting cell. The mutation is
    /// validated, marks the actor dirty, and triggers `on_state_change`.
    pub async fn update_state<R>(
        &self,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, WarrenError> {
        self.instance.update_state(f).await
    }

    /// Replace state wholesale.
    pub async fn set_state(&self, value: Value) -> Result<(), WarrenError> {
        self.instance.update_state(|state| *state = value).await
    }

    /// Ephemeral per-load vars.
    pub async fn vars(&self) -> Value {
        self.instance.vars().await
    }

    /// Broadcast an event to every subscribed connection.
    pub async fn broadcast(&self, name: &str, args: Value) {
        self.instance.broadcast(name, args).await;
    }

    /// Schedule an action invocation at an absolute epoch-ms timestamp.
    pub async fn schedule_at(
        &self,
        timestamp: i64,
        action: &str,
        args: Value,
    ) -> Result<Uuid, WarrenError> {
        self.instance.schedule_event(timestamp, action, args).await
    }

    /// Schedule an action invocation after a delay.
    pub async fn schedule_after(
        &self,
        delay: Duration,
        action: &str,
        args: Value,
    ) -> Result<Uuid, WarrenError> {
        let timestamp = crate::persist::epoch_ms() + delay.as_millis() as i64;
        self.instance.schedule_event(timestamp, action, args).await
    }

    /// Persist state now (or arm the throttled writer).
    pub async fn save_state(&self, immediate: bool) -> Result<(), WarrenError> {
        self.instance.save_state(immediate).await
    }

    /// Run a background future that the actor drains before stopping.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.instance.wait_until(fut);
    }

    /// Abort signal fired when the actor stops.
    pub fn abort_signal(&self) -> tokio_util::sync::CancellationToken {
        self.instance.abort_signal()
    }
}

/// Context for one action invocation: the actor plus the calling
/// connection, if the action arrived over one.
#[derive(Clone)]
pub struct ActionContext {
    actor: ActorContext,
    conn_id: Option<Uuid>,
}

impl ActionContext {
    pub(crate) fn new(actor: ActorContext, conn_id: Option<Uuid>) -> Self {
        Self { actor, conn_id }
    }

    pub fn actor(&self) -> &ActorContext {
        &self.actor
    }

    pub fn conn_id(&self) -> Option<Uuid> {
        self.conn_id
    }

    /// Per-connection state of the calling connection.
    pub async fn conn_state(&self) -> Option<Value> {
        match self.conn_id {
            Some(id) => self.actor.instance.conn_state(id).await,
            None => None,
        }
    }

    /// Replace the calling connection's state.
    pub async fn set_conn_state(&self, value: Value) -> Result<(), WarrenError> {
        let Some(id) = self.conn_id else {
            return Err(WarrenError::internal("action has no connection"));
        };
        self.actor.instance.set_conn_state(id, value).await
    }

    pub async fn state(&self) -> Value {
        self.actor.state().await
    }

    pub async fn update_state<R>(
        &self,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, WarrenError> {
        self.actor.update_state(f).await
    }

    pub async fn broadcast(&self, name: &str, args: Value) {
        self.actor.broadcast(name, args).await;
    }

    pub async fn schedule_after(
        &self,
        delay: Duration,
        action: &str,
        args: Value,
    ) -> Result<Uuid, WarrenError> {
        self.actor.schedule_after(delay, action, args).await
    }

    pub async fn schedule_at(
        &self,
        timestamp: i64,
        action: &str,
        args: Value,
    ) -> Result<Uuid, WarrenError> {
        self.actor.schedule_at(timestamp, action, args).await
    }
}
