// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The actor instance: composes state, connections, scheduling, and
//! persistence, and drives the create → start → run → sleep/stop
//! lifecycle.
//!
//! All mutable aggregates sit behind their own locks and no write guard is
//! held across an await, so mutations are atomic sections and interleaving
//! only happens at suspension points.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::definition::{ActorDefinition, ActorOptions, RawRequest, RawResponse};
use crate::driver::StorageDriver;
use crate::error::WarrenError;
use crate::persist::{
    epoch_ms, PersistedActor, PersistedConn, PersistedStore, SaveThrottle, ScheduledEvent,
};
use crate::protocol::{CachedSerializer, Encoding, ToClient, ToServer, Value};

use super::conn::{new_token, ConnectionRegistry, DetachOutcome};
use super::schedule::{insert_sorted, is_sorted, new_event, next_deadline, split_due};
use super::socket::ConnSocket;
use super::state::StateCell;
use super::{dispatch, ActorContext};

/// How long the stop sequence waits for peers to acknowledge disconnects.
const DISCONNECT_DRAIN: Duration = Duration::from_millis(1500);

impl std::fmt::Debug for ActorInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorInstance")
            .field("actor_id", &self.actor_id)
            .field("name", &self.name)
            .finish()
    }
}

pub struct ActorInstance {
    actor_id: Uuid,
    name: String,
    key: Vec<String>,
    definition: Arc<ActorDefinition>,
    /// Resolved options: the definition's overrides, else the runner's
    /// process-wide defaults.
    options: ActorOptions,
    store: PersistedStore,
    throttle: SaveThrottle,
    state: RwLock<StateCell>,
    vars: RwLock<Value>,
    input: RwLock<Option<Value>>,
    conns: ConnectionRegistry,
    scheduled: RwLock<Vec<ScheduledEvent>>,
    ready: AtomicBool,
    stopping: AtomicBool,
    sleeping: AtomicBool,
    abort: CancellationToken,
    in_state_change: AtomicBool,
    raw_fetches: AtomicUsize,
    raw_websockets: AtomicUsize,
    sleep_notify: Arc<Notify>,
    wait_until_tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Tells the runner this actor wants to unload (sleep path).
    unload_tx: mpsc::UnboundedSender<Uuid>,
}

impl ActorInstance {
    pub fn new(
        actor_id: Uuid,
        name: String,
        key: Vec<String>,
        definition: Arc<ActorDefinition>,
        defaults: ActorOptions,
        storage: Arc<dyn StorageDriver>,
        unload_tx: mpsc::UnboundedSender<Uuid>,
    ) -> Arc<Self> {
        let options = definition.options.clone().unwrap_or(defaults);
        Arc::new(Self {
            actor_id,
            name,
            key,
            definition,
            options,
            store: PersistedStore::new(storage, actor_id),
            throttle: SaveThrottle::new(),
            state: RwLock::new(StateCell::new(Value::Null)),
            vars: RwLock::new(Value::Null),
            input: RwLock::new(None),
            conns: ConnectionRegistry::new(),
            scheduled: RwLock::new(Vec::new()),
            ready: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            sleeping: AtomicBool::new(false),
            abort: CancellationToken::new(),
            in_state_change: AtomicBool::new(false),
            raw_fetches: AtomicUsize::new(0),
            raw_websockets: AtomicUsize::new(0),
            sleep_notify: Arc::new(Notify::new()),
            wait_until_tasks: parking_lot::Mutex::new(Vec::new()),
            unload_tx,
        })
    }

    // -- Accessors ------------------------------------------------------------

    pub fn actor_id(&self) -> Uuid {
        self.actor_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &[String] {
        &self.key
    }

    pub fn definition(&self) -> &Arc<ActorDefinition> {
        &self.definition
    }

    pub fn options(&self) -> &ActorOptions {
        &self.options
    }

    pub fn abort_signal(&self) -> CancellationToken {
        self.abort.clone()
    }

    pub async fn input(&self) -> Option<Value> {
        self.input.read().await.clone()
    }

    pub async fn state_snapshot(&self) -> Value {
        self.state.read().await.get().clone()
    }

    pub async fn vars(&self) -> Value {
        self.vars.read().await.clone()
    }

    pub async fn conn_state(&self, conn_id: Uuid) -> Option<Value> {
        self.conns.conn_state(conn_id).await
    }

    pub async fn set_conn_state(&self, conn_id: Uuid, value: Value) -> Result<(), WarrenError> {
        self.conns.set_conn_state(conn_id, value).await?;
        self.throttle.mark_dirty();
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.ready.load(Ordering::Acquire)
            && !self.stopping.load(Ordering::Acquire)
            && !self.sleeping.load(Ordering::Acquire)
    }

    /// Readiness invariant for externally reachable entry points.
    fn assert_ready(&self) -> Result<(), WarrenError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(WarrenError::internal("actor is not ready"))
        }
    }

    pub(crate) fn arm_save(&self) {
        self.throttle.arm();
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Load (or first-create) the actor and bring it to ready.
    pub async fn start(self: &Arc<Self>, input: Option<Value>) -> Result<(), WarrenError> {
        let ctx = ActorContext::new(Arc::clone(self));
        let opts = &self.options;

        let mut persisted = match self.store.read().await? {
            Some(persisted) => persisted,
            None => PersistedActor::fresh(self.name.clone(), self.key.clone(), input),
        };
        *self.input.write().await = persisted.input.clone();

        if !persisted.has_initiated {
            let state = match &self.definition.create_state {
                Some(create) => create(ctx.clone()).await?,
                None => Value::Null,
            };
            self.state.write().await.replace(state.clone())?;
            persisted.state = state;
            persisted.has_initiated = true;
            if let Some(hook) = &self.definition.on_create {
                hook(ctx.clone()).await?;
            }
            // First write happens before any connection is accepted.
            persisted.state = self.state_snapshot().await;
            self.store.write(self.throttle.current_generation(), &persisted).await?;
            info!(actor_id = %self.actor_id, name = %self.name, "actor created");
        } else {
            self.state.write().await.replace(persisted.state.clone())?;
        }

        self.conns.restore(persisted.connections).await;
        {
            let mut scheduled = self.scheduled.write().await;
            *scheduled = persisted.scheduled_events;
            if !is_sorted(&scheduled) {
                scheduled.sort_by_key(|e| e.timestamp);
            }
        }

        // Ephemeral vars are rebuilt on every load.
        if let Some(create_vars) = &self.definition.create_vars {
            let vars = timeout(opts.create_vars_timeout, create_vars(ctx.clone()))
                .await
                .map_err(|_| WarrenError::internal("create_vars timed out"))??;
            *self.vars.write().await = vars;
        }

        if let Some(hook) = &self.definition.on_start {
            hook(ctx).await?;
        }

        self.ready.store(true, Ordering::Release);

        // Rearm the alarm for the earliest pending event.
        let deadline = next_deadline(&*self.scheduled.read().await);
        self.store.set_alarm(deadline).await?;

        // Reap connections stuck reconnecting across the sleep cycle.
        let reaped = self.conns.sweep(opts.connection_liveness_timeout.as_millis() as i64).await;
        if !reaped.is_empty() {
            self.throttle.mark_dirty();
            for conn in reaped {
                self.fire_on_disconnect(conn.persisted.conn_id).await;
            }
        }

        self.spawn_background_tasks();
        info!(actor_id = %self.actor_id, name = %self.name, "actor started");
        Ok(())
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        // Throttled saver.
        {
            let instance = Arc::clone(self);
            let interval = self.options.state_save_interval;
            tokio::spawn(async move {
                let shutdown = instance.abort.clone();
                let saver = Arc::clone(&instance);
                instance
                    .throttle
                    .run(interval, shutdown, move || {
                        let instance = Arc::clone(&saver);
                        async move {
                            if let Err(err) = instance.save_now().await {
                                warn!(actor_id = %instance.actor_id, "throttled save failed: {err}");
                            }
                        }
                    })
                    .await;
            });
        }

        // Liveness sweeper.
        {
            let instance = Arc::clone(self);
            let interval = self.options.connection_liveness_interval;
            let timeout_ms = self.options.connection_liveness_timeout.as_millis() as i64;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = instance.abort.cancelled() => return,
                        _ = tokio::time::sleep(interval) => {}
                    }
                    let reaped = instance.conns.sweep(timeout_ms).await;
                    if !reaped.is_empty() {
                        instance.throttle.mark_dirty();
                        for conn in reaped {
                            instance.fire_on_disconnect(conn.persisted.conn_id).await;
                        }
                        instance.sleep_notify.notify_one();
                    }
                }
            });
        }

        // Sleep timer.
        {
            let instance = Arc::clone(self);
            let sleep_timeout = self.options.sleep_timeout;
            tokio::spawn(async move {
                loop {
                    if !instance.can_sleep().await {
                        tokio::select! {
                            _ = instance.abort.cancelled() => return,
                            _ = instance.sleep_notify.notified() => continue,
                        }
                    }
                    tokio::select! {
                        _ = instance.abort.cancelled() => return,
                        _ = instance.sleep_notify.notified() => continue,
                        _ = tokio::time::sleep(sleep_timeout) => {
                            if instance.can_sleep().await {
                                instance.begin_sleep().await;
                                return;
                            }
                        }
                    }
                }
            });
        }
    }

    /// Sleep-eligibility predicate.
    async fn can_sleep(&self) -> bool {
        if self.options.no_sleep
            || !self.ready.load(Ordering::Acquire)
            || self.stopping.load(Ordering::Acquire)
            || self.raw_fetches.load(Ordering::Acquire) > 0
            || self.raw_websockets.load(Ordering::Acquire) > 0
        {
            return false;
        }
        self.conns.connected_count().await == 0
    }

    /// The idle timer fired: hint the driver and ask the runner to unload.
    async fn begin_sleep(self: &Arc<Self>) {
        if self.stopping.load(Ordering::Acquire) {
            return;
        }
        self.sleeping.store(true, Ordering::Release);
        debug!(actor_id = %self.actor_id, "actor going to sleep");
        if let Err(err) = self.store.sleep_hint().await {
            warn!(actor_id = %self.actor_id, "sleep hint failed: {err}");
        }
        let _ = self.unload_tx.send(self.actor_id);
    }

    /// Force the sleep path now — the same sequence the idle timer takes.
    pub async fn sleep(self: &Arc<Self>) {
        self.begin_sleep().await;
    }

    /// Terminal shutdown: abort, hooks, disconnects, drains, final flush.
    pub async fn stop(self: &Arc<Self>) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(actor_id = %self.actor_id, sleeping = self.sleeping.load(Ordering::Acquire), "actor stopping");
        self.abort.cancel();

        if let Some(hook) = &self.definition.on_stop {
            let ctx = ActorContext::new(Arc::clone(self));
            match timeout(self.options.on_stop_timeout, hook(ctx)).await {
                Ok(Err(err)) => warn!(actor_id = %self.actor_id, "on_stop failed: {err}"),
                Err(_) => warn!(actor_id = %self.actor_id, "on_stop timed out"),
                Ok(Ok(())) => {}
            }
        }

        // Disconnect every connection, bounded by the drain window.
        let sockets = self.conns.take_sockets().await;
        let drain = async {
            for socket in &sockets {
                socket.disconnect(None);
            }
            for socket in &sockets {
                socket.wait_closed().await;
            }
        };
        if timeout(DISCONNECT_DRAIN, drain).await.is_err() {
            debug!(actor_id = %self.actor_id, "disconnect drain timed out");
        }

        // Drain background promises, aborting whatever outlives the window.
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.wait_until_tasks.lock());
        let deadline = tokio::time::Instant::now() + self.options.wait_until_timeout;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                task.abort();
            }
        }

        // Final flush is allowed in the stopping state.
        if let Err(err) = self.save_now().await {
            warn!(actor_id = %self.actor_id, "final persist failed: {err}");
        }
        self.ready.store(false, Ordering::Release);
        info!(actor_id = %self.actor_id, "actor stopped");
    }

    // -- State ----------------------------------------------------------------

    /// Mutate state through the cell; marks dirty and fires
    /// `on_state_change` (reentrancy-guarded) on a real change.
    pub async fn update_state<R>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut Value) -> R,
    ) -> Result<R, WarrenError> {
        if self.definition.create_state.is_none() {
            return Err(WarrenError::new(
                crate::error::ErrorCode::ActorStateNotEnabled,
                "actor does not define state",
            ));
        }
        let (out, changed, new_state) = {
            let mut cell = self.state.write().await;
            let before = cell.version();
            let out = cell.mutate(f)?;
            let changed = cell.version() != before;
            let snapshot = changed.then(|| cell.get().clone());
            (out, changed, snapshot)
        };
        if changed {
            self.throttle.mark_dirty();
            if self.ready.load(Ordering::Acquire)
                && !self.in_state_change.swap(true, Ordering::AcqRel)
            {
                if let Some(hook) = &self.definition.on_state_change {
                    let ctx = ActorContext::new(Arc::clone(self));
                    hook(ctx, new_state.unwrap_or(Value::Null)).await;
                }
                self.in_state_change.store(false, Ordering::Release);
            }
        }
        Ok(out)
    }

    /// Assemble the durable snapshot.
    async fn snapshot(&self) -> PersistedActor {
        PersistedActor {
            name: self.name.clone(),
            key: self.key.clone(),
            has_initiated: true,
            input: self.input.read().await.clone(),
            state: self.state_snapshot().await,
            connections: self.conns.snapshot().await,
            scheduled_events: self.scheduled.read().await.clone(),
        }
    }

    /// Write the current snapshot through the single-writer queue.
    /// Idempotent when nothing was dirtied since the last write.
    pub async fn save_now(&self) -> Result<(), WarrenError> {
        let generation = self.throttle.current_generation();
        let snapshot = self.snapshot().await;
        self.store.write(generation, &snapshot).await?;
        Ok(())
    }

    /// Public save entry: immediate flush or arm the throttled writer.
    pub async fn save_state(&self, immediate: bool) -> Result<(), WarrenError> {
        if immediate {
            self.save_now().await
        } else {
            self.throttle.arm();
            Ok(())
        }
    }

    /// Run a background future the stop sequence will drain.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(fut);
        self.wait_until_tasks.lock().push(handle);
    }

    // -- Connections ----------------------------------------------------------

    /// Handshake entry: fresh connect or reconnect by `(conn_id, token)`.
    /// Returns the connection id; `Init` is already on the wire.
    pub async fn create_conn(
        self: &Arc<Self>,
        socket: ConnSocket,
        encoding: Encoding,
        params: Value,
        reconnect: Option<(Uuid, String)>,
    ) -> Result<Uuid, WarrenError> {
        self.assert_ready()?;
        let opts = &self.options;

        if let Some((conn_id, token)) = reconnect {
            let old = self
                .conns
                .rebind_and_init(self.actor_id, conn_id, &token, socket, encoding)
                .await?;
            if let Some(old) = old {
                // Detach only; the persisted connection survives.
                old.disconnect(None);
            }
            self.throttle.mark_dirty();
            self.sleep_notify.notify_one();
            return Ok(conn_id);
        }

        let ctx = ActorContext::new(Arc::clone(self));
        if let Some(hook) = &self.definition.on_before_connect {
            timeout(opts.on_connect_timeout, hook(ctx.clone(), params.clone()))
                .await
                .map_err(|_| WarrenError::internal("on_before_connect timed out"))??;
        }
        let conn_state = match &self.definition.create_conn_state {
            Some(create) => timeout(opts.create_conn_state_timeout, create(ctx, params.clone()))
                .await
                .map_err(|_| WarrenError::internal("create_conn_state timed out"))??,
            None => Value::Null,
        };

        let persisted = PersistedConn {
            conn_id: Uuid::new_v4(),
            token: new_token(),
            params,
            state: conn_state,
            subscriptions: Vec::new(),
            last_seen: epoch_ms(),
        };
        let conn_id = persisted.conn_id;
        self.conns.insert_and_init(self.actor_id, persisted, socket, encoding).await?;
        self.throttle.mark_dirty();
        self.save_now().await?;

        if let Some(hook) = &self.definition.on_connect {
            let ctx = ActorContext::new(Arc::clone(self));
            let outcome = timeout(opts.on_connect_timeout, hook(ctx, conn_id)).await;
            let failed = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(err),
                Err(_) => Some(WarrenError::internal("on_connect timed out")),
            };
            if let Some(err) = failed {
                warn!(actor_id = %self.actor_id, conn_id = %conn_id, "on_connect failed: {err}");
                self.disconnect_conn(conn_id, Some("onConnect failed")).await;
                return Err(err);
            }
        }

        self.sleep_notify.notify_one();
        Ok(conn_id)
    }

    /// Server-initiated removal (with an optional reason sent in the close).
    pub async fn disconnect_conn(self: &Arc<Self>, conn_id: Uuid, reason: Option<&str>) {
        if let Some(conn) = self.conns.remove(conn_id).await {
            if let Some(socket) = &conn.socket {
                socket.disconnect(reason);
            }
            self.throttle.mark_dirty();
            if let Err(err) = self.save_now().await {
                warn!(actor_id = %self.actor_id, "persist after disconnect failed: {err}");
            }
            self.fire_on_disconnect(conn_id).await;
            self.sleep_notify.notify_one();
        }
    }

    /// Transport close event. Clean closes remove the connection; unclean
    /// ones leave it reconnecting for the liveness window. Stale socket ids
    /// are ignored.
    pub async fn conn_disconnected(self: &Arc<Self>, conn_id: Uuid, socket_id: Uuid, clean: bool) {
        if clean {
            if !self.conns.socket_is_current(conn_id, socket_id).await {
                return;
            }
            if let Some(_conn) = self.conns.remove(conn_id).await {
                self.throttle.mark_dirty();
                if let Err(err) = self.save_now().await {
                    warn!(actor_id = %self.actor_id, "persist after close failed: {err}");
                }
                self.fire_on_disconnect(conn_id).await;
            }
        } else if self.conns.detach(conn_id, socket_id).await == DetachOutcome::Detached {
            debug!(actor_id = %self.actor_id, conn_id = %conn_id, "connection reconnecting");
            self.throttle.mark_dirty();
        }
        self.sleep_notify.notify_one();
    }

    async fn fire_on_disconnect(self: &Arc<Self>, conn_id: Uuid) {
        if let Some(hook) = &self.definition.on_disconnect {
            let ctx = ActorContext::new(Arc::clone(self));
            if let Err(err) = hook(ctx, conn_id).await {
                warn!(actor_id = %self.actor_id, conn_id = %conn_id, "on_disconnect failed: {err}");
            }
        }
    }

    /// Verify `(conn_id, token)` for message injection over HTTP.
    pub async fn authorize_conn(&self, conn_id: Uuid, token: &str) -> Result<(), WarrenError> {
        self.conns.authorize(conn_id, token).await
    }

    pub async fn connected_count(&self) -> usize {
        self.conns.connected_count().await
    }

    // -- Message processing ---------------------------------------------------

    /// Route one inbound protocol message from a connection.
    pub async fn process_message(
        self: &Arc<Self>,
        conn_id: Uuid,
        msg: ToServer,
    ) -> Result<(), WarrenError> {
        self.assert_ready()?;
        match msg {
            ToServer::ActionRequest { id, name, args } => {
                let reply = match dispatch::invoke(self, Some(conn_id), &name, args).await {
                    Ok(output) => ToClient::ActionResponse { id, output },
                    Err(err) => {
                        debug!(actor_id = %self.actor_id, action = %name, "action failed: {err}");
                        ToClient::error(
                            &err,
                            self.options.expose_internal_error,
                            Some(id),
                        )
                    }
                };
                self.conns.send_to(conn_id, &CachedSerializer::new(reply)).await;
            }
            ToServer::SubscriptionRequest { event_name, subscribe } => {
                let changed = self.conns.set_subscription(conn_id, &event_name, subscribe).await?;
                if changed {
                    self.throttle.mark_dirty();
                    self.save_now().await?;
                }
            }
        }
        Ok(())
    }

    /// One-shot HTTP action: an ephemeral connection wraps the dispatch so
    /// connection hooks observe it like any other.
    pub async fn handle_action(
        self: &Arc<Self>,
        name: &str,
        args: Value,
        params: Value,
    ) -> Result<Value, WarrenError> {
        self.assert_ready()?;
        let conn_id =
            self.create_conn(ConnSocket::http(), Encoding::default(), params, None).await?;
        let result = dispatch::invoke(self, Some(conn_id), name, args).await;
        // Ephemeral: clean removal regardless of outcome.
        if let Some(_conn) = self.conns.remove(conn_id).await {
            self.throttle.mark_dirty();
            self.fire_on_disconnect(conn_id).await;
        }
        let _ = self.save_now().await;
        self.sleep_notify.notify_one();
        result
    }

    /// Push an `Error` frame to one connection.
    pub async fn send_error(&self, conn_id: Uuid, err: &WarrenError, action_id: Option<u64>) {
        let frame =
            ToClient::error(err, self.options.expose_internal_error, action_id);
        self.conns.send_to(conn_id, &CachedSerializer::new(frame)).await;
    }

    /// Broadcast an event to every subscribed connection.
    pub async fn broadcast(&self, name: &str, args: Value) {
        let message =
            CachedSerializer::new(ToClient::Event { name: name.to_owned(), args });
        self.conns.broadcast(&message).await;
    }

    // -- Scheduling -----------------------------------------------------------

    /// Queue a deferred action invocation and keep the driver alarm armed
    /// for the earliest deadline.
    pub async fn schedule_event(
        &self,
        timestamp: i64,
        action: &str,
        args: Value,
    ) -> Result<Uuid, WarrenError> {
        let (event_id, head_changed, deadline) = {
            let mut queue = self.scheduled.write().await;
            let was_empty = queue.is_empty();
            let event = new_event(timestamp, action, args);
            let event_id = event.event_id;
            let index = insert_sorted(&mut queue, event);
            (event_id, index == 0 || was_empty, next_deadline(&queue))
        };
        self.throttle.mark_dirty();
        self.save_now().await?;
        if head_changed {
            self.store.set_alarm(deadline).await?;
        }
        Ok(event_id)
    }

    /// Driver alarm fired: splice due events, flush, rearm, dispatch in
    /// timestamp order. Per-event errors are logged and swallowed.
    pub async fn on_alarm(self: &Arc<Self>) -> Result<(), WarrenError> {
        let now = epoch_ms();
        let (due, deadline) = {
            let mut queue = self.scheduled.write().await;
            let due = split_due(&mut queue, now);
            (due, next_deadline(&queue))
        };

        if due.is_empty() {
            // Fired early (or spuriously): rearm and return.
            if deadline.is_some() {
                self.store.set_alarm(deadline).await?;
            }
            return Ok(());
        }

        self.throttle.mark_dirty();
        self.save_now().await?;
        self.store.set_alarm(deadline).await?;

        for event in due {
            debug!(
                actor_id = %self.actor_id,
                action = %event.action_name,
                timestamp = event.timestamp,
                "scheduled event due"
            );
            match dispatch::invoke(self, None, &event.action_name, event.args).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        actor_id = %self.actor_id,
                        action = %event.action_name,
                        "scheduled event failed: {err}"
                    );
                }
            }
        }
        self.sleep_notify.notify_one();
        Ok(())
    }

    // -- Raw passthrough ------------------------------------------------------

    /// User-defined raw HTTP handler (`/raw/http/*`).
    pub async fn handle_fetch(self: &Arc<Self>, req: RawRequest) -> Result<RawResponse, WarrenError> {
        self.assert_ready()?;
        let Some(hook) = self.definition.on_fetch.clone() else {
            return Err(WarrenError::new(
                crate::error::ErrorCode::FetchNotDefined,
                "actor does not define on_fetch",
            ));
        };
        let _guard = InFlight::enter(&self.raw_fetches, &self.sleep_notify);
        let ctx = ActorContext::new(Arc::clone(self));
        hook(ctx, req).await
    }

    /// User-defined raw WebSocket handler (`/raw/websocket/*`). Holds the
    /// open-websocket count for the handler's whole run.
    pub async fn handle_websocket(
        self: &Arc<Self>,
        ws: axum::extract::ws::WebSocket,
        req: RawRequest,
    ) -> Result<(), WarrenError> {
        self.assert_ready()?;
        let Some(hook) = self.definition.on_websocket.clone() else {
            return Err(WarrenError::new(
                crate::error::ErrorCode::WebSocketNotDefined,
                "actor does not define on_websocket",
            ));
        };
        let _guard = InFlight::enter(&self.raw_websockets, &self.sleep_notify);
        let ctx = ActorContext::new(Arc::clone(self));
        hook(ctx, ws, req).await
    }
}

/// RAII in-flight counter: decrements on drop so an aborted request can
/// never wedge the sleep predicate.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
    notify: &'a Notify,
}

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, notify: &'a Notify) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        notify.notify_one();
        Self { counter, notify }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
        self.notify.notify_one();
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
