// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket handshake metadata.
//!
//! Browsers cannot set arbitrary headers on a WebSocket upgrade, so the
//! handshake rides in `Sec-WebSocket-Protocol` as comma-separated tagged
//! protocols (`rivet`, `rivet_encoding.<e>`, `rivet_conn_params.<…>`, …).
//! Tokens never appear in the URL path or query string.

use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::{Encoding, Value};

pub const PROTOCOL_BASE: &str = "rivet";
const TAG_TARGET: &str = "rivet_target.";
const TAG_ACTOR: &str = "rivet_actor.";
const TAG_ENCODING: &str = "rivet_encoding.";
const TAG_CONN_PARAMS: &str = "rivet_conn_params.";
const TAG_CONN: &str = "rivet_conn.";
const TAG_CONN_TOKEN: &str = "rivet_conn_token.";

/// Parsed handshake metadata from the protocol list.
#[derive(Debug, Clone)]
pub struct WsHandshake {
    pub target: Option<String>,
    pub actor_id: Option<Uuid>,
    pub encoding: Encoding,
    pub params: Value,
    /// Raw (still-urlencoded) length of the params protocol, for the size
    /// guard.
    pub params_len: usize,
    pub conn_id: Option<Uuid>,
    pub conn_token: Option<String>,
}

impl Default for WsHandshake {
    fn default() -> Self {
        Self {
            target: None,
            actor_id: None,
            encoding: Encoding::Json,
            params: Value::Null,
            params_len: 0,
            conn_id: None,
            conn_token: None,
        }
    }
}

impl WsHandshake {
    pub fn reconnect(&self) -> Option<(Uuid, String)> {
        match (self.conn_id, &self.conn_token) {
            (Some(id), Some(token)) => Some((id, token.clone())),
            _ => None,
        }
    }
}

/// Parse a `Sec-WebSocket-Protocol` header value.
pub fn parse_protocols(header: &str) -> Result<WsHandshake, WarrenError> {
    let mut handshake = WsHandshake::default();
    for raw in header.split(',') {
        let proto = raw.trim();
        if proto.is_empty() || proto == PROTOCOL_BASE {
            continue;
        }
        if let Some(value) = proto.strip_prefix(TAG_ENCODING) {
            handshake.encoding = value.parse()?;
        } else if let Some(value) = proto.strip_prefix(TAG_CONN_PARAMS) {
            handshake.params_len = value.len();
            handshake.params = super::decode_conn_params(value)?;
        } else if let Some(value) = proto.strip_prefix(TAG_CONN_TOKEN) {
            handshake.conn_token = Some(value.to_owned());
        } else if let Some(value) = proto.strip_prefix(TAG_CONN) {
            let id = Uuid::parse_str(value)
                .map_err(|e| WarrenError::malformed(format!("invalid conn id: {e}")))?;
            handshake.conn_id = Some(id);
        } else if let Some(value) = proto.strip_prefix(TAG_ACTOR) {
            let id = Uuid::parse_str(value)
                .map_err(|e| WarrenError::malformed(format!("invalid actor id: {e}")))?;
            handshake.actor_id = Some(id);
        } else if let Some(value) = proto.strip_prefix(TAG_TARGET) {
            handshake.target = Some(value.to_owned());
        }
        // Unknown rivet_* tags are tolerated for forward compatibility.
    }
    Ok(handshake)
}

/// Build a protocol header value for an outgoing connection (proxy path
/// and test clients).
pub fn build_protocols(
    target: Option<&str>,
    actor_id: Option<Uuid>,
    encoding: Encoding,
    params_json: Option<&str>,
    reconnect: Option<&(Uuid, String)>,
) -> String {
    let mut parts = vec![PROTOCOL_BASE.to_owned()];
    if let Some(target) = target {
        parts.push(format!("{TAG_TARGET}{target}"));
    }
    if let Some(actor_id) = actor_id {
        parts.push(format!("{TAG_ACTOR}{actor_id}"));
    }
    parts.push(format!("{TAG_ENCODING}{}", encoding.as_str()));
    if let Some(params) = params_json {
        parts.push(format!("{TAG_CONN_PARAMS}{}", urlencoding::encode(params)));
    }
    if let Some((conn_id, token)) = reconnect {
        parts.push(format!("{TAG_CONN}{conn_id}"));
        parts.push(format!("{TAG_CONN_TOKEN}{token}"));
    }
    parts.join(", ")
}

#[cfg(test)]
#[path = "handshake_tests.rs"]
mod tests;
