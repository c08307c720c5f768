// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted actor state: the versioned blob layout, serializability
//! validation, and the per-actor single-writer queues that guarantee no
//! two storage writes (or alarm writes) are ever in flight concurrently.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::driver::StorageDriver;
use crate::error::WarrenError;
use crate::protocol::Value;

/// Blob magic. The third byte is the schema version; loaders run upgraders
/// for older versions and fail closed on unknown future versions.
const BLOB_MAGIC: [u8; 2] = *b"WA";
const BLOB_VERSION: u8 = 1;

/// Everything durable about one actor. Written as a whole on change.
///
/// Carries the immutable `(name, key)` identity so a runner can wake the
/// actor from the blob alone (alarm fires, proxy-routed requests).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedActor {
    /// Definition name; immutable after creation.
    pub name: String,
    /// User-supplied key; immutable after creation.
    pub key: Vec<String>,
    /// False until `create_state`/`on_create` has completed once.
    pub has_initiated: bool,
    /// Creation input, if any.
    pub input: Option<Value>,
    /// User state.
    pub state: Value,
    /// Surviving connections.
    pub connections: Vec<PersistedConn>,
    /// Pending scheduled events, sorted by timestamp ascending.
    pub scheduled_events: Vec<ScheduledEvent>,
}

impl PersistedActor {
    pub fn fresh(name: String, key: Vec<String>, input: Option<Value>) -> Self {
        Self {
            name,
            key,
            has_initiated: false,
            input,
            state: Value::Null,
            connections: Vec::new(),
            scheduled_events: Vec::new(),
        }
    }
}

/// A connection that survives socket loss for the liveness window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedConn {
    pub conn_id: Uuid,
    pub token: String,
    pub params: Value,
    pub state: Value,
    pub subscriptions: Vec<String>,
    /// Epoch millis of the last socket activity.
    pub last_seen: i64,
}

/// A deferred action invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub event_id: Uuid,
    /// Epoch millis at which the event becomes due.
    pub timestamp: i64,
    pub action_name: String,
    pub args: Value,
}

/// Current epoch millis.
pub fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// -- Blob envelope ------------------------------------------------------------

pub fn encode_actor(actor: &PersistedActor) -> Result<Vec<u8>, WarrenError> {
    validate_state(&actor.state)?;
    let mut out = vec![BLOB_MAGIC[0], BLOB_MAGIC[1], BLOB_VERSION];
    ciborium::into_writer(actor, &mut out)
        .map_err(|e| WarrenError::internal(format!("persist encode: {e}")))?;
    Ok(out)
}

pub fn decode_actor(bytes: &[u8]) -> Result<PersistedActor, WarrenError> {
    let (header, body) = bytes
        .split_at_checked(3)
        .ok_or_else(|| WarrenError::internal("persist blob is truncated"))?;
    if header[..2] != BLOB_MAGIC {
        return Err(WarrenError::internal("persist blob has wrong magic"));
    }
    match header[2] {
        BLOB_VERSION => ciborium::from_reader(body)
            .map_err(|e| WarrenError::internal(format!("persist decode: {e}"))),
        v => Err(WarrenError::internal(format!("persist blob from unknown future version {v}"))),
    }
}

/// Check that a state value can be persisted: every map key along the way
/// must be text. Returns the offending path on failure.
pub fn validate_state(state: &Value) -> Result<(), WarrenError> {
    fn walk(value: &Value, path: &mut String) -> Result<(), WarrenError> {
        match value {
            Value::Map(entries) => {
                for (key, val) in entries {
                    let Value::Text(key) = key else {
                        return Err(WarrenError::invalid_state_type(path));
                    };
                    let len = path.len();
                    path.push('.');
                    path.push_str(key);
                    walk(val, path)?;
                    path.truncate(len);
                }
                Ok(())
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    let len = path.len();
                    path.push_str(&format!("[{i}]"));
                    walk(item, path)?;
                    path.truncate(len);
                }
                Ok(())
            }
            Value::Tag(_, inner) => walk(inner, path),
            _ => Ok(()),
        }
    }
    let mut path = String::from("state");
    walk(state, &mut path)
}

// -- Persisted store ----------------------------------------------------------

/// Typed wrapper over the storage driver for one actor.
///
/// Writes and alarm updates are serialized through per-actor queues;
/// anything enqueued while an operation is in flight coalesces into a
/// single subsequent invocation.
pub struct PersistedStore {
    storage: Arc<dyn StorageDriver>,
    actor_id: Uuid,
    /// Holds the last persisted generation; doubles as the write lock.
    write_state: tokio::sync::Mutex<u64>,
    alarm_flush: tokio::sync::Mutex<()>,
    alarm_latest: parking_lot::Mutex<Option<Option<i64>>>,
}

impl PersistedStore {
    pub fn new(storage: Arc<dyn StorageDriver>, actor_id: Uuid) -> Self {
        Self {
            storage,
            actor_id,
            write_state: tokio::sync::Mutex::new(0),
            alarm_flush: tokio::sync::Mutex::new(()),
            alarm_latest: parking_lot::Mutex::new(None),
        }
    }

    /// Tell the driver the actor intends to unload.
    pub async fn sleep_hint(&self) -> Result<(), WarrenError> {
        self.storage
            .sleep(self.actor_id)
            .await
            .map_err(|e| WarrenError::internal(format!("storage sleep: {e:#}")))
    }

    pub async fn read(&self) -> Result<Option<PersistedActor>, WarrenError> {
        let blob = self
            .storage
            .read_blob(self.actor_id)
            .await
            .map_err(|e| WarrenError::internal(format!("storage read: {e:#}")))?;
        blob.as_deref().map(decode_actor).transpose()
    }

    /// Write a snapshot taken at `generation`. Returns false when a newer
    /// generation already reached storage and the write was coalesced away.
    pub async fn write(
        &self,
        generation: u64,
        actor: &PersistedActor,
    ) -> Result<bool, WarrenError> {
        let blob = encode_actor(actor)?;
        let mut last = self.write_state.lock().await;
        if *last >= generation && generation != 0 {
            return Ok(false);
        }
        self.storage
            .write_blob(self.actor_id, blob)
            .await
            .map_err(|e| WarrenError::internal(format!("storage write: {e:#}")))?;
        *last = (*last).max(generation);
        Ok(true)
    }

    /// Arm (or disarm) the driver alarm. Last write wins: concurrent calls
    /// collapse to the newest requested deadline, and at most one driver
    /// call is in flight at a time.
    pub async fn set_alarm(&self, deadline: Option<i64>) -> Result<(), WarrenError> {
        *self.alarm_latest.lock() = Some(deadline);
        loop {
            let Ok(guard) = self.alarm_flush.try_lock() else {
                // Another task is flushing; it will pick up our value.
                return Ok(());
            };
            loop {
                let next = self.alarm_latest.lock().take();
                let Some(deadline) = next else { break };
                self.storage
                    .set_alarm(self.actor_id, deadline)
                    .await
                    .map_err(|e| WarrenError::internal(format!("storage alarm: {e:#}")))?;
            }
            drop(guard);
            // A value stored after our last take but before the unlock would
            // otherwise be lost.
            if self.alarm_latest.lock().is_none() {
                return Ok(());
            }
        }
    }
}

// -- Throttled saver ----------------------------------------------------------

/// Arms a delayed save; repeated arms within the interval coalesce into
/// one write.
pub struct SaveThrottle {
    armed: AtomicBool,
    notify: Notify,
    generation: AtomicU64,
}

impl Default for SaveThrottle {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveThrottle {
    pub fn new() -> Self {
        Self { armed: AtomicBool::new(false), notify: Notify::new(), generation: AtomicU64::new(0) }
    }

    /// Bump the persist generation and arm the delayed save.
    pub fn mark_dirty(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.arm();
        generation
    }

    /// Arm the delayed save without bumping the generation. If nothing was
    /// dirtied by the time it fires, the write coalesces away.
    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether a delayed save is pending.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Run the saver loop: wait for an arm, debounce for `interval`, then
    /// invoke `save`. Exits when `shutdown` fires; the final flush is the
    /// stop sequence's job.
    pub async fn run<F, Fut>(&self, interval: Duration, shutdown: CancellationToken, save: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = self.notify.notified() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            self.armed.store(false, Ordering::Release);
            save().await;
        }
    }
}

#[cfg(test)]
#[path = "persist_tests.rs"]
mod tests;
