// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager driver seam: actor lookup and creation by id or key.
//!
//! The in-memory implementation backs single-process deployments and the
//! test suite. Keys are serialized deterministically (JSON array of
//! strings) for the key index.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use warren::error::WarrenError;
use warren::protocol::Value;

/// One actor as the manager sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRecord {
    pub actor_id: Uuid,
    pub name: String,
    pub key: Vec<String>,
}

/// Filters for the actor listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub name: Option<String>,
    pub key: Option<Vec<String>>,
    pub actor_ids: Vec<Uuid>,
}

#[async_trait]
pub trait ManagerDriver: Send + Sync {
    /// Look up by id; fails `actor/not_found` when missing or when the
    /// found actor's name disagrees.
    async fn get_for_id(&self, name: &str, actor_id: Uuid) -> Result<ActorRecord, WarrenError>;

    /// Existence check by id alone (stream routing after resolve).
    async fn get_by_id(&self, actor_id: Uuid) -> Result<Option<ActorRecord>, WarrenError>;

    async fn get_for_key(
        &self,
        name: &str,
        key: &[String],
    ) -> Result<Option<ActorRecord>, WarrenError>;

    /// Idempotent get-or-create; the bool reports whether a new actor was
    /// created.
    async fn get_or_create_for_key(
        &self,
        name: &str,
        key: &[String],
        input: Option<Value>,
    ) -> Result<(ActorRecord, bool), WarrenError>;

    /// Always create; fails `actor/already_exists` when the key is taken.
    async fn create(
        &self,
        name: &str,
        key: Option<Vec<String>>,
        input: Option<Value>,
    ) -> Result<ActorRecord, WarrenError>;

    async fn list(&self, filter: ListFilter) -> Result<Vec<ActorRecord>, WarrenError>;
}

/// Deterministic serialization of a key for index lookup.
pub fn serialize_key(key: &[String]) -> String {
    serde_json::to_string(key).unwrap_or_default()
}

/// In-memory manager driver.
///
/// Creation allocates the actor's persist blob through the shared storage
/// driver so any runner can wake it from storage alone.
pub struct MemoryManagerDriver {
    storage: std::sync::Arc<dyn warren::StorageDriver>,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    actors: IndexMap<Uuid, ActorRecord>,
    by_key: HashMap<(String, String), Uuid>,
}

impl MemoryManagerDriver {
    pub fn new(storage: std::sync::Arc<dyn warren::StorageDriver>) -> Self {
        Self { storage, inner: RwLock::new(Inner::default()) }
    }

    async fn insert_record(
        &self,
        inner: &mut Inner,
        name: &str,
        key: Vec<String>,
        input: Option<Value>,
    ) -> Result<ActorRecord, WarrenError> {
        let record = ActorRecord { actor_id: Uuid::new_v4(), name: name.to_owned(), key };
        warren::runner::allocate_actor(
            &self.storage,
            record.actor_id,
            name,
            &record.key,
            input,
        )
        .await?;
        inner.by_key.insert((name.to_owned(), serialize_key(&record.key)), record.actor_id);
        inner.actors.insert(record.actor_id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl ManagerDriver for MemoryManagerDriver {
    async fn get_for_id(&self, name: &str, actor_id: Uuid) -> Result<ActorRecord, WarrenError> {
        let inner = self.inner.read().await;
        match inner.actors.get(&actor_id) {
            Some(record) if record.name == name => Ok(record.clone()),
            _ => Err(WarrenError::actor_not_found(actor_id)),
        }
    }

    async fn get_by_id(&self, actor_id: Uuid) -> Result<Option<ActorRecord>, WarrenError> {
        Ok(self.inner.read().await.actors.get(&actor_id).cloned())
    }

    async fn get_for_key(
        &self,
        name: &str,
        key: &[String],
    ) -> Result<Option<ActorRecord>, WarrenError> {
        let inner = self.inner.read().await;
        let id = inner.by_key.get(&(name.to_owned(), serialize_key(key)));
        Ok(id.and_then(|id| inner.actors.get(id).cloned()))
    }

    async fn get_or_create_for_key(
        &self,
        name: &str,
        key: &[String],
        input: Option<Value>,
    ) -> Result<(ActorRecord, bool), WarrenError> {
        // The write lock spans check and insert, so two concurrent calls
        // with the same (name, key) resolve to one actor.
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.by_key.get(&(name.to_owned(), serialize_key(key))) {
            let record = inner
                .actors
                .get(id)
                .cloned()
                .ok_or_else(|| WarrenError::internal("key index points at missing record"))?;
            return Ok((record, false));
        }
        let record = self.insert_record(&mut inner, name, key.to_vec(), input).await?;
        Ok((record, true))
    }

    async fn create(
        &self,
        name: &str,
        key: Option<Vec<String>>,
        input: Option<Value>,
    ) -> Result<ActorRecord, WarrenError> {
        let key = key.unwrap_or_else(|| vec![Uuid::new_v4().to_string()]);
        let mut inner = self.inner.write().await;
        if inner.by_key.contains_key(&(name.to_owned(), serialize_key(&key))) {
            return Err(WarrenError::actor_already_exists(name));
        }
        self.insert_record(&mut inner, name, key, input).await
    }

    async fn list(&self, filter: ListFilter) -> Result<Vec<ActorRecord>, WarrenError> {
        let inner = self.inner.read().await;
        if !filter.actor_ids.is_empty() {
            return Ok(filter
                .actor_ids
                .iter()
                .filter_map(|id| inner.actors.get(id).cloned())
                .collect());
        }
        let key = filter.key.as_deref().map(serialize_key);
        Ok(inner
            .actors
            .values()
            .filter(|record| filter.name.as_deref().is_none_or(|n| record.name == n))
            .filter(|record| key.as_deref().is_none_or(|k| serialize_key(&record.key) == k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
