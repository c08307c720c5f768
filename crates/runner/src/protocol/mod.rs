// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client↔actor wire protocol: tagged message unions and the versioned
//! envelope shared by every encoding.
//!
//! Dynamic payloads (action args, action output, event args, error
//! metadata) are CBOR values end to end; each encoding decides how they
//! cross the wire.

pub mod bare;
pub mod cbor;
pub mod encoding;
pub mod json;

pub use encoding::{CachedSerializer, Encoding};

use uuid::Uuid;

use crate::error::WarrenError;

/// Dynamic payload type used for state, args, and outputs.
pub type Value = ciborium::Value;

/// Current wire schema version. Binary encodings prefix every message with
/// this byte; JSON carries it as a `"v"` field. Unknown future versions
/// fail closed.
pub const PROTOCOL_VERSION: u8 = 1;

/// Messages a client sends to an actor.
#[derive(Debug, Clone, PartialEq)]
pub enum ToServer {
    ActionRequest { id: u64, name: String, args: Value },
    SubscriptionRequest { event_name: String, subscribe: bool },
}

/// Messages an actor sends to a client. `Init` is always the first frame
/// on every connection, fresh or reconnected.
#[derive(Debug, Clone, PartialEq)]
pub enum ToClient {
    Init {
        actor_id: String,
        connection_id: Uuid,
        connection_token: String,
    },
    ActionResponse {
        id: u64,
        output: Value,
    },
    Event {
        name: String,
        args: Value,
    },
    Error {
        group: String,
        code: String,
        message: String,
        metadata: Option<Value>,
        action_id: Option<u64>,
    },
}

impl ToClient {
    /// Build an `Error` frame from a runtime error, redacting non-public
    /// messages unless internal errors are exposed.
    pub fn error(err: &WarrenError, expose_internal: bool, action_id: Option<u64>) -> Self {
        let wire = err.for_wire(expose_internal);
        Self::Error {
            group: wire.code.group().to_owned(),
            code: wire.code.code().to_owned(),
            message: wire.message,
            metadata: wire.metadata,
            action_id,
        }
    }
}

/// One-shot HTTP action call body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpActionRequest {
    pub args: Value,
}

/// One-shot HTTP action call response body.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpActionResponse {
    pub output: Value,
}

/// Strip and check the one-byte version prefix of a binary message.
pub(crate) fn check_version(bytes: &[u8]) -> Result<&[u8], WarrenError> {
    match bytes.split_first() {
        Some((&PROTOCOL_VERSION, rest)) => Ok(rest),
        Some((v, _)) => Err(WarrenError::malformed(format!("unknown protocol version {v}"))),
        None => Err(WarrenError::malformed("empty message")),
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
