// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actor definitions: the per-name bundle of lifecycle hooks, action
//! handlers, and options that the runtime instantiates actors from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::actor::{ActionContext, ActorContext};
use crate::error::WarrenError;
use crate::protocol::Value;

pub type ActionFn =
    Arc<dyn Fn(ActionContext, Value) -> BoxFuture<'static, Result<Value, WarrenError>> + Send + Sync>;

type InitFn =
    Arc<dyn Fn(ActorContext) -> BoxFuture<'static, Result<Value, WarrenError>> + Send + Sync>;
type HookFn =
    Arc<dyn Fn(ActorContext) -> BoxFuture<'static, Result<(), WarrenError>> + Send + Sync>;
type StateChangeFn = Arc<dyn Fn(ActorContext, Value) -> BoxFuture<'static, ()> + Send + Sync>;
type ConnHookFn =
    Arc<dyn Fn(ActorContext, Uuid) -> BoxFuture<'static, Result<(), WarrenError>> + Send + Sync>;
type BeforeConnectFn =
    Arc<dyn Fn(ActorContext, Value) -> BoxFuture<'static, Result<(), WarrenError>> + Send + Sync>;
type ConnStateFn =
    Arc<dyn Fn(ActorContext, Value) -> BoxFuture<'static, Result<Value, WarrenError>> + Send + Sync>;
type BeforeResponseFn = Arc<
    dyn Fn(ActionContext, String, Value) -> BoxFuture<'static, Result<Value, WarrenError>>
        + Send
        + Sync,
>;
type FetchFn = Arc<
    dyn Fn(ActorContext, RawRequest) -> BoxFuture<'static, Result<RawResponse, WarrenError>>
        + Send
        + Sync,
>;
type WebSocketFn = Arc<
    dyn Fn(ActorContext, axum::extract::ws::WebSocket, RawRequest)
            -> BoxFuture<'static, Result<(), WarrenError>>
        + Send
        + Sync,
>;

/// A raw HTTP request handed to `on_fetch` / `on_websocket` (path already
/// stripped of the `/raw/http` prefix).
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// A raw HTTP response returned by `on_fetch`.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self { status: 200, headers: Vec::new(), body: body.into() }
    }
}

/// Per-definition tunables. Defaults match the runtime-wide contract.
#[derive(Debug, Clone)]
pub struct ActorOptions {
    pub create_vars_timeout: Duration,
    pub create_conn_state_timeout: Duration,
    pub on_connect_timeout: Duration,
    pub on_stop_timeout: Duration,
    pub action_timeout: Duration,
    pub wait_until_timeout: Duration,
    pub connection_liveness_timeout: Duration,
    pub connection_liveness_interval: Duration,
    pub sleep_timeout: Duration,
    pub state_save_interval: Duration,
    pub max_connection_params_size: usize,
    pub max_incoming_message_size: usize,
    pub no_sleep: bool,
    pub expose_internal_error: bool,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            create_vars_timeout: Duration::from_secs(5),
            create_conn_state_timeout: Duration::from_secs(5),
            on_connect_timeout: Duration::from_secs(5),
            on_stop_timeout: Duration::from_secs(5),
            action_timeout: Duration::from_secs(60),
            wait_until_timeout: Duration::from_secs(15),
            connection_liveness_timeout: Duration::from_millis(2500),
            connection_liveness_interval: Duration::from_secs(5),
            sleep_timeout: Duration::from_secs(30),
            state_save_interval: Duration::from_secs(10),
            max_connection_params_size: 4 * 1024,
            max_incoming_message_size: 64 * 1024,
            no_sleep: false,
            expose_internal_error: false,
        }
    }
}

/// One actor type: name, hooks, actions, options.
///
/// Built with chained setters:
///
/// ```ignore
/// let counter = ActorDefinition::new("counter")
///     .create_state(|_ctx| async { Ok(Value::Integer(0.into())) })
///     .action("increment", |ctx, args| async move { /* ... */ });
/// ```
pub struct ActorDefinition {
    pub name: String,
    /// Per-definition option overrides; `None` inherits the runner's
    /// process-wide defaults.
    pub options: Option<ActorOptions>,
    pub create_state: Option<InitFn>,
    pub create_vars: Option<InitFn>,
    pub on_create: Option<HookFn>,
    pub on_start: Option<HookFn>,
    pub on_stop: Option<HookFn>,
    pub on_state_change: Option<StateChangeFn>,
    pub on_before_connect: Option<BeforeConnectFn>,
    pub create_conn_state: Option<ConnStateFn>,
    pub on_connect: Option<ConnHookFn>,
    pub on_disconnect: Option<ConnHookFn>,
    pub on_before_action_response: Option<BeforeResponseFn>,
    pub on_fetch: Option<FetchFn>,
    pub on_websocket: Option<WebSocketFn>,
    pub actions: HashMap<String, ActionFn>,
}

impl ActorDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: None,
            create_state: None,
            create_vars: None,
            on_create: None,
            on_start: None,
            on_stop: None,
            on_state_change: None,
            on_before_connect: None,
            create_conn_state: None,
            on_connect: None,
            on_disconnect: None,
            on_before_action_response: None,
            on_fetch: None,
            on_websocket: None,
            actions: HashMap::new(),
        }
    }

    pub fn options(mut self, options: ActorOptions) -> Self {
        self.options = Some(options);
        self
    }

    pub fn create_state<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WarrenError>> + Send + 'static,
    {
        self.create_state = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn create_vars<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WarrenError>> + Send + 'static,
    {
        self.create_vars = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn on_create<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_create = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn on_start<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_start = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn on_stop<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_stop = Some(Arc::new(move |ctx| Box::pin(f(ctx))));
        self
    }

    pub fn on_state_change<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_state_change = Some(Arc::new(move |ctx, state| Box::pin(f(ctx, state))));
        self
    }

    pub fn on_before_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_before_connect = Some(Arc::new(move |ctx, params| Box::pin(f(ctx, params))));
        self
    }

    pub fn create_conn_state<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WarrenError>> + Send + 'static,
    {
        self.create_conn_state = Some(Arc::new(move |ctx, params| Box::pin(f(ctx, params))));
        self
    }

    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, Uuid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move |ctx, conn_id| Box::pin(f(ctx, conn_id))));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, Uuid) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move |ctx, conn_id| Box::pin(f(ctx, conn_id))));
        self
    }

    pub fn on_before_action_response<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActionContext, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WarrenError>> + Send + 'static,
    {
        self.on_before_action_response =
            Some(Arc::new(move |ctx, name, output| Box::pin(f(ctx, name, output))));
        self
    }

    pub fn on_fetch<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, RawRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RawResponse, WarrenError>> + Send + 'static,
    {
        self.on_fetch = Some(Arc::new(move |ctx, req| Box::pin(f(ctx, req))));
        self
    }

    pub fn on_websocket<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ActorContext, axum::extract::ws::WebSocket, RawRequest) -> Fut
            + Send
            + Sync
            + 'static,
        Fut: Future<Output = Result<(), WarrenError>> + Send + 'static,
    {
        self.on_websocket = Some(Arc::new(move |ctx, ws, req| Box::pin(f(ctx, ws, req))));
        self
    }

    pub fn action<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActionContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WarrenError>> + Send + 'static,
    {
        self.actions.insert(name.into(), Arc::new(move |ctx, args| Box::pin(f(ctx, args))));
        self
    }
}

/// Name → definition map shared by the runner and the manager.
#[derive(Default)]
pub struct Registry {
    definitions: HashMap<String, Arc<ActorDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(mut self, definition: ActorDefinition) -> Self {
        self.definitions.insert(definition.name.clone(), Arc::new(definition));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActorDefinition>> {
        self.definitions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        names.sort();
        names
    }
}
