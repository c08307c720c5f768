// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage driver seam.
//!
//! The runtime treats storage as an external collaborator: one opaque blob
//! and one alarm timestamp per actor. Drivers report failures as `anyhow`
//! errors; the core wraps them into internal wire errors at the boundary.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

pub mod memory;

pub use memory::MemoryStorage;

/// Per-actor durable storage plus a single wake-up alarm.
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Read the actor's blob. `None` only before the first write.
    async fn read_blob(&self, actor_id: Uuid) -> anyhow::Result<Option<Vec<u8>>>;

    /// Overwrite the actor's blob. Atomic with respect to other writes to
    /// the same actor.
    async fn write_blob(&self, actor_id: Uuid, blob: Vec<u8>) -> anyhow::Result<()>;

    /// Arm the actor's alarm for `deadline` (epoch millis), or disarm it.
    /// The driver fires by emitting the actor id on the alarm stream.
    async fn set_alarm(&self, actor_id: Uuid, deadline: Option<i64>) -> anyhow::Result<()>;

    /// Hint that the actor intends to unload. Optional.
    async fn sleep(&self, _actor_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    /// Take the stream of fired alarms. Yields each actor id whose alarm
    /// came due; consumed once by the runner at startup.
    fn take_alarm_stream(&self) -> Option<mpsc::UnboundedReceiver<Uuid>>;
}
