// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory storage driver: blobs in a map, alarms as tokio timers.
//!
//! The reference driver for single-process deployments and the test
//! suite. Alarm fires are delivered on an unbounded channel the runner
//! drains.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::persist::epoch_ms;

use super::StorageDriver;

pub struct MemoryStorage {
    blobs: RwLock<HashMap<Uuid, Vec<u8>>>,
    timers: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    fire_tx: mpsc::UnboundedSender<Uuid>,
    fire_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        Self {
            blobs: RwLock::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            fire_tx,
            fire_rx: parking_lot::Mutex::new(Some(fire_rx)),
        }
    }

    /// Number of actors with a persisted blob.
    pub async fn blob_count(&self) -> usize {
        self.blobs.read().await.len()
    }
}

#[async_trait]
impl StorageDriver for MemoryStorage {
    async fn read_blob(&self, actor_id: Uuid) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(&actor_id).cloned())
    }

    async fn write_blob(&self, actor_id: Uuid, blob: Vec<u8>) -> anyhow::Result<()> {
        self.blobs.write().await.insert(actor_id, blob);
        Ok(())
    }

    async fn set_alarm(&self, actor_id: Uuid, deadline: Option<i64>) -> anyhow::Result<()> {
        let mut timers = self.timers.lock().await;
        if let Some(old) = timers.remove(&actor_id) {
            old.abort();
        }
        let Some(deadline) = deadline else {
            debug!(actor_id = %actor_id, "alarm disarmed");
            return Ok(());
        };
        let delay = deadline.saturating_sub(epoch_ms()).max(0) as u64;
        let tx = self.fire_tx.clone();
        debug!(actor_id = %actor_id, deadline, delay_ms = delay, "alarm armed");
        timers.insert(
            actor_id,
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                let _ = tx.send(actor_id);
            }),
        );
        Ok(())
    }

    fn take_alarm_stream(&self) -> Option<mpsc::UnboundedReceiver<Uuid>> {
        self.fire_rx.lock().take()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
