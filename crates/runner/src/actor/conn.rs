// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection registry for one actor.
//!
//! Owns the conn-id → connection map and the event subscription index.
//! Reconnects rebind an existing connection by `(conn_id, token)`; a
//! connection that loses its socket survives for the liveness window.
//! Hook invocation and persistence stay with the instance; the registry
//! reports what changed.

use std::collections::{HashMap, HashSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::WarrenError;
use crate::persist::{epoch_ms, PersistedConn};
use crate::protocol::{CachedSerializer, Encoding, ToClient, Value};

use super::socket::ConnSocket;

/// Connection status derived from socket presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    Connected,
    Reconnecting,
}

/// One client↔actor association: durable half plus at most one socket.
pub struct Connection {
    pub persisted: PersistedConn,
    pub socket: Option<ConnSocket>,
    pub encoding: Encoding,
}

impl Connection {
    pub fn status(&self) -> ConnStatus {
        if self.socket.is_some() {
            ConnStatus::Connected
        } else {
            ConnStatus::Reconnecting
        }
    }
}

/// Generate an unforgeable URL-safe connection token (32 random bytes).
pub fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// What `detach` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachOutcome {
    /// The socket id did not match the bound socket; a newer reconnect
    /// already happened and the event is ignored.
    Stale,
    /// The socket was detached; the connection lingers as reconnecting.
    Detached,
    /// No such connection.
    Unknown,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<Uuid, Connection>>,
    subscriptions: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from persisted connections on actor start; all
    /// enter reconnecting (no socket) and the immediate liveness sweep
    /// reaps the ones whose window already lapsed.
    pub async fn restore(&self, persisted: Vec<PersistedConn>) {
        let mut conns = self.conns.write().await;
        let mut subs = self.subscriptions.write().await;
        for conn in persisted {
            for event in &conn.subscriptions {
                subs.entry(event.clone()).or_default().insert(conn.conn_id);
            }
            conns.insert(
                conn.conn_id,
                Connection { persisted: conn, socket: None, encoding: Encoding::default() },
            );
        }
    }

    /// Insert a fresh connection and send its `Init` while the map lock is
    /// held, so no broadcast can slip a frame ahead of it.
    pub async fn insert_and_init(
        &self,
        actor_id: Uuid,
        persisted: PersistedConn,
        socket: ConnSocket,
        encoding: Encoding,
    ) -> Result<(), WarrenError> {
        let mut conns = self.conns.write().await;
        if conns.contains_key(&persisted.conn_id) {
            return Err(WarrenError::internal(format!(
                "duplicate connection id {}",
                persisted.conn_id
            )));
        }
        send_init(&socket, actor_id, &persisted, encoding)?;
        conns.insert(
            persisted.conn_id,
            Connection { persisted, socket: Some(socket), encoding },
        );
        Ok(())
    }

    /// Rebind an existing connection to a new socket after verifying its
    /// token. Any old socket is detached and handed back for disconnect.
    /// `Init` with the existing ids goes out under the lock.
    pub async fn rebind_and_init(
        &self,
        actor_id: Uuid,
        conn_id: Uuid,
        token: &str,
        socket: ConnSocket,
        encoding: Encoding,
    ) -> Result<Option<ConnSocket>, WarrenError> {
        let mut conns = self.conns.write().await;
        let conn = conns
            .get_mut(&conn_id)
            .ok_or_else(|| WarrenError::connection_not_found(conn_id))?;
        if conn.persisted.token != token {
            return Err(WarrenError::incorrect_token());
        }
        send_init(&socket, actor_id, &conn.persisted, encoding)?;
        let old = conn.socket.replace(socket);
        conn.encoding = encoding;
        conn.persisted.last_seen = epoch_ms();
        debug!(conn_id = %conn_id, "connection rebound");
        Ok(old)
    }

    /// Verify `(conn_id, token)` for message injection over HTTP.
    pub async fn authorize(&self, conn_id: Uuid, token: &str) -> Result<(), WarrenError> {
        let conns = self.conns.read().await;
        let conn = conns
            .get(&conn_id)
            .ok_or_else(|| WarrenError::connection_not_found(conn_id))?;
        if conn.persisted.token != token {
            return Err(WarrenError::incorrect_token());
        }
        Ok(())
    }

    /// Drop the socket after a non-clean close. Stale socket ids (an even
    /// newer socket is already bound) are ignored.
    pub async fn detach(&self, conn_id: Uuid, socket_id: Uuid) -> DetachOutcome {
        let mut conns = self.conns.write().await;
        let Some(conn) = conns.get_mut(&conn_id) else {
            return DetachOutcome::Unknown;
        };
        match &conn.socket {
            Some(socket) if socket.socket_id() == socket_id => {
                conn.socket = None;
                conn.persisted.last_seen = epoch_ms();
                DetachOutcome::Detached
            }
            _ => DetachOutcome::Stale,
        }
    }

    /// Remove a connection outright, purging its subscriptions. Returns the
    /// removed connection so the caller can fire `on_disconnect`.
    pub async fn remove(&self, conn_id: Uuid) -> Option<Connection> {
        let mut conns = self.conns.write().await;
        let conn = conns.remove(&conn_id)?;
        let mut subs = self.subscriptions.write().await;
        for event in &conn.persisted.subscriptions {
            if let Some(set) = subs.get_mut(event) {
                set.remove(&conn_id);
                if set.is_empty() {
                    subs.remove(event);
                }
            }
        }
        Some(conn)
    }

    /// Is the bound socket's id current for this connection?
    pub async fn socket_is_current(&self, conn_id: Uuid, socket_id: Uuid) -> bool {
        let conns = self.conns.read().await;
        conns
            .get(&conn_id)
            .and_then(|c| c.socket.as_ref())
            .is_some_and(|s| s.socket_id() == socket_id)
    }

    /// Toggle a subscription. Returns whether the set changed.
    pub async fn set_subscription(
        &self,
        conn_id: Uuid,
        event_name: &str,
        subscribe: bool,
    ) -> Result<bool, WarrenError> {
        let mut conns = self.conns.write().await;
        let conn = conns
            .get_mut(&conn_id)
            .ok_or_else(|| WarrenError::connection_not_found(conn_id))?;
        let mut subs = self.subscriptions.write().await;
        let changed = if subscribe {
            let added = !conn.persisted.subscriptions.iter().any(|e| e == event_name);
            if added {
                conn.persisted.subscriptions.push(event_name.to_owned());
                subs.entry(event_name.to_owned()).or_default().insert(conn_id);
            }
            added
        } else {
            let before = conn.persisted.subscriptions.len();
            conn.persisted.subscriptions.retain(|e| e != event_name);
            if let Some(set) = subs.get_mut(event_name) {
                set.remove(&conn_id);
                if set.is_empty() {
                    subs.remove(event_name);
                }
            }
            before != conn.persisted.subscriptions.len()
        };
        Ok(changed)
    }

    /// Fan an event out to every subscriber. Serialization happens at most
    /// once per encoding via the cached serializer.
    ///
    /// Lock order is conns → subscriptions, matching every other path.
    pub async fn broadcast(&self, message: &CachedSerializer) {
        let event_name = match message.message() {
            ToClient::Event { name, .. } => name.clone(),
            _ => return,
        };
        let conns = self.conns.read().await;
        let subs = self.subscriptions.read().await;
        let Some(targets) = subs.get(&event_name) else { return };
        for conn_id in targets {
            let Some(conn) = conns.get(conn_id) else { continue };
            let Some(socket) = &conn.socket else { continue };
            if let Err(err) = socket.send(message, conn.encoding) {
                debug!(conn_id = %conn_id, "broadcast send failed: {err}");
            }
        }
    }

    /// Send a frame to one connection.
    pub async fn send_to(&self, conn_id: Uuid, message: &CachedSerializer) {
        let conns = self.conns.read().await;
        let Some(conn) = conns.get(&conn_id) else { return };
        let Some(socket) = &conn.socket else { return };
        if let Err(err) = socket.send(message, conn.encoding) {
            debug!(conn_id = %conn_id, "send failed: {err}");
        }
    }

    /// Remove socketless connections whose liveness window lapsed. Returns
    /// the reaped connections.
    pub async fn sweep(&self, timeout_ms: i64) -> Vec<Connection> {
        let now = epoch_ms();
        let expired: Vec<Uuid> = {
            let conns = self.conns.read().await;
            conns
                .values()
                .filter(|c| c.socket.is_none() && now - c.persisted.last_seen > timeout_ms)
                .map(|c| c.persisted.conn_id)
                .collect()
        };
        let mut removed = Vec::with_capacity(expired.len());
        for conn_id in expired {
            if let Some(conn) = self.remove(conn_id).await {
                debug!(conn_id = %conn_id, "liveness sweep removed connection");
                removed.push(conn);
            }
        }
        removed
    }

    /// Durable snapshot of all connections.
    pub async fn snapshot(&self) -> Vec<PersistedConn> {
        let conns = self.conns.read().await;
        let mut out: Vec<PersistedConn> = conns.values().map(|c| c.persisted.clone()).collect();
        out.sort_by_key(|c| c.conn_id);
        out
    }

    /// Connections with a bound socket.
    pub async fn connected_count(&self) -> usize {
        let conns = self.conns.read().await;
        conns.values().filter(|c| c.socket.is_some()).count()
    }

    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }

    /// The per-connection user state.
    pub async fn conn_state(&self, conn_id: Uuid) -> Option<Value> {
        let conns = self.conns.read().await;
        conns.get(&conn_id).map(|c| c.persisted.state.clone())
    }

    /// Replace the per-connection user state.
    pub async fn set_conn_state(&self, conn_id: Uuid, value: Value) -> Result<(), WarrenError> {
        let mut conns = self.conns.write().await;
        let conn = conns
            .get_mut(&conn_id)
            .ok_or_else(|| WarrenError::connection_not_found(conn_id))?;
        conn.persisted.state = value;
        Ok(())
    }

    /// Take every socket for the stop sequence's parallel disconnect.
    pub async fn take_sockets(&self) -> Vec<ConnSocket> {
        let mut conns = self.conns.write().await;
        conns.values_mut().filter_map(|c| c.socket.take()).collect()
    }

    pub async fn all_conn_ids(&self) -> Vec<Uuid> {
        self.conns.read().await.keys().copied().collect()
    }
}

fn send_init(
    socket: &ConnSocket,
    actor_id: Uuid,
    persisted: &PersistedConn,
    encoding: Encoding,
) -> Result<(), WarrenError> {
    // Ephemeral HTTP connections have no stream to carry an Init.
    if !socket.supports_frames() {
        return Ok(());
    }
    let init = CachedSerializer::new(ToClient::Init {
        actor_id: actor_id.to_string(),
        connection_id: persisted.conn_id,
        connection_token: persisted.token.clone(),
    });
    socket.send(&init, encoding)
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
