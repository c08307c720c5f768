// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The runner: hosts actor instances for one process.
//!
//! Holds at most one instance per actor id, wakes actors from their
//! persisted blob on demand (incoming request or alarm fire), and unloads
//! them when they go to sleep.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::actor::ActorInstance;
use crate::definition::{ActorOptions, Registry};
use crate::driver::StorageDriver;
use crate::error::WarrenError;
use crate::persist::{decode_actor, encode_actor, PersistedActor};
use crate::protocol::Value;

pub struct Runner {
    registry: Arc<Registry>,
    storage: Arc<dyn StorageDriver>,
    /// Process-wide option defaults; definitions without their own
    /// [`ActorOptions`] inherit these.
    defaults: ActorOptions,
    actors: RwLock<HashMap<Uuid, Arc<ActorInstance>>>,
    /// Per-actor locks serializing load/unload so at most one instance
    /// exists per actor id at any instant.
    lifecycle_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    unload_tx: mpsc::UnboundedSender<Uuid>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Build the runner with stock option defaults and spawn its alarm and
    /// unload loops.
    pub fn new(
        registry: Registry,
        storage: Arc<dyn StorageDriver>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Self::with_defaults(registry, storage, ActorOptions::default(), shutdown)
    }

    /// Build the runner with process-wide option defaults (usually
    /// [`RunnerConfig::actor_options`](crate::config::RunnerConfig::actor_options)).
    pub fn with_defaults(
        registry: Registry,
        storage: Arc<dyn StorageDriver>,
        defaults: ActorOptions,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (unload_tx, unload_rx) = mpsc::unbounded_channel();
        let runner = Arc::new(Self {
            registry: Arc::new(registry),
            storage: Arc::clone(&storage),
            defaults,
            actors: RwLock::new(HashMap::new()),
            lifecycle_locks: Mutex::new(HashMap::new()),
            unload_tx,
            shutdown,
        });
        runner.spawn_unload_loop(unload_rx);
        runner.spawn_alarm_loop();
        runner
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn lifecycle_lock(&self, actor_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.lifecycle_locks.lock().await;
        Arc::clone(locks.entry(actor_id).or_default())
    }

    /// Allocate the persist blob for a new actor (`has_initiated = false`).
    /// Idempotent: an existing blob is left untouched.
    pub async fn ensure_created(
        &self,
        actor_id: Uuid,
        name: &str,
        key: &[String],
        input: Option<Value>,
    ) -> Result<(), WarrenError> {
        let lock = self.lifecycle_lock(actor_id).await;
        let _guard = lock.lock().await;
        allocate_actor(&self.storage, actor_id, name, key, input).await
    }

    /// The running instance, if any.
    pub async fn get_running(&self, actor_id: Uuid) -> Option<Arc<ActorInstance>> {
        self.actors.read().await.get(&actor_id).cloned()
    }

    /// Resolve an actor id to a live instance, waking it from its blob if
    /// needed. `Ok(None)` when no blob exists.
    pub async fn load_by_id(
        self: &Arc<Self>,
        actor_id: Uuid,
    ) -> Result<Option<Arc<ActorInstance>>, WarrenError> {
        if let Some(instance) = self.get_running(actor_id).await {
            if instance.is_available() {
                return Ok(Some(instance));
            }
        }

        let lock = self.lifecycle_lock(actor_id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent load may have won.
        if let Some(instance) = self.get_running(actor_id).await {
            if instance.is_available() {
                return Ok(Some(instance));
            }
            // A stopping instance still holds the map slot; finish it first.
            self.actors.write().await.remove(&actor_id);
            instance.stop().await;
        }

        let blob = self
            .storage
            .read_blob(actor_id)
            .await
            .map_err(|e| WarrenError::internal(format!("storage read: {e:#}")))?;
        let Some(blob) = blob else { return Ok(None) };
        let persisted = decode_actor(&blob)?;

        let definition = self.registry.get(&persisted.name).ok_or_else(|| {
            WarrenError::internal(format!("no definition for actor name {}", persisted.name))
        })?;

        let instance = ActorInstance::new(
            actor_id,
            persisted.name.clone(),
            persisted.key.clone(),
            definition,
            self.defaults.clone(),
            Arc::clone(&self.storage),
            self.unload_tx.clone(),
        );
        instance.start(None).await?;
        self.actors.write().await.insert(actor_id, Arc::clone(&instance));
        Ok(Some(instance))
    }

    /// Resolve or fail with `actor/not_found`.
    pub async fn require(
        self: &Arc<Self>,
        actor_id: Uuid,
    ) -> Result<Arc<ActorInstance>, WarrenError> {
        self.load_by_id(actor_id)
            .await?
            .ok_or_else(|| WarrenError::actor_not_found(actor_id))
    }

    fn spawn_unload_loop(self: &Arc<Self>, mut unload_rx: mpsc::UnboundedReceiver<Uuid>) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let actor_id = tokio::select! {
                    _ = runner.shutdown.cancelled() => return,
                    id = unload_rx.recv() => match id {
                        Some(id) => id,
                        None => return,
                    },
                };
                runner.unload(actor_id).await;
            }
        });
    }

    async fn unload(self: &Arc<Self>, actor_id: Uuid) {
        let lock = self.lifecycle_lock(actor_id).await;
        let _guard = lock.lock().await;
        // Only reap an instance that is actually on its way down; a stale
        // unload message must not tear down a freshly re-woken actor.
        let instance = {
            let mut actors = self.actors.write().await;
            match actors.get(&actor_id) {
                Some(instance) if !instance.is_available() => actors.remove(&actor_id),
                _ => None,
            }
        };
        if let Some(instance) = instance {
            instance.stop().await;
            debug!(actor_id = %actor_id, "actor unloaded");
        }
    }

    fn spawn_alarm_loop(self: &Arc<Self>) {
        let Some(mut alarms) = self.storage.take_alarm_stream() else {
            warn!("storage driver exposes no alarm stream; scheduled events will not fire");
            return;
        };
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let actor_id = tokio::select! {
                    _ = runner.shutdown.cancelled() => return,
                    id = alarms.recv() => match id {
                        Some(id) => id,
                        None => return,
                    },
                };
                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    match runner.load_by_id(actor_id).await {
                        Ok(Some(instance)) => {
                            if let Err(err) = instance.on_alarm().await {
                                warn!(actor_id = %actor_id, "alarm dispatch failed: {err}");
                            }
                        }
                        Ok(None) => {
                            debug!(actor_id = %actor_id, "alarm for unknown actor ignored");
                        }
                        Err(err) => {
                            warn!(actor_id = %actor_id, "alarm wake failed: {err}");
                        }
                    }
                });
            }
        });
    }

    /// Stop every instance; used on graceful shutdown.
    pub async fn stop_all(&self) {
        let instances: Vec<Arc<ActorInstance>> = {
            let mut actors = self.actors.write().await;
            actors.drain().map(|(_, v)| v).collect()
        };
        for instance in instances {
            instance.stop().await;
        }
    }

    pub async fn running_count(&self) -> usize {
        self.actors.read().await.len()
    }
}

/// Write the fresh (`has_initiated = false`) blob for a new actor unless
/// one already exists. The manager calls this at creation time; the
/// runner's first load then runs `create_state`/`on_create`.
pub async fn allocate_actor(
    storage: &Arc<dyn StorageDriver>,
    actor_id: Uuid,
    name: &str,
    key: &[String],
    input: Option<Value>,
) -> Result<(), WarrenError> {
    let existing = storage
        .read_blob(actor_id)
        .await
        .map_err(|e| WarrenError::internal(format!("storage read: {e:#}")))?;
    if existing.is_some() {
        return Ok(());
    }
    let fresh = PersistedActor::fresh(name.to_owned(), key.to_vec(), input);
    let blob = encode_actor(&fresh)?;
    storage
        .write_blob(actor_id, blob)
        .await
        .map_err(|e| WarrenError::internal(format!("storage write: {e:#}")))?;
    debug!(actor_id = %actor_id, name, "persist blob allocated");
    Ok(())
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
