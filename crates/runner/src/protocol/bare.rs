// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! BARE wire encoding.
//!
//! BARE has no dynamic type, so args/output/metadata cross the wire as
//! CBOR-encoded byte blobs inside BARE structs. The tagged unions map to
//! BARE unions via serde variant indices.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::{
    check_version, HttpActionRequest, HttpActionResponse, ToClient, ToServer, Value,
    PROTOCOL_VERSION,
};

fn value_to_cbor(value: &Value) -> Result<ByteBuf, WarrenError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| WarrenError::internal(format!("cbor encode: {e}")))?;
    Ok(ByteBuf::from(out))
}

fn value_from_cbor(bytes: &[u8]) -> Result<Value, WarrenError> {
    ciborium::from_reader(bytes)
        .map_err(|e| WarrenError::malformed(format!("invalid cbor payload: {e}")))
}

#[derive(Debug, Serialize, Deserialize)]
enum ToServerWire {
    ActionRequest { id: u64, name: String, args: ByteBuf },
    SubscriptionRequest { event_name: String, subscribe: bool },
}

#[derive(Debug, Serialize, Deserialize)]
enum ToClientWire {
    Init { actor_id: String, connection_id: String, connection_token: String },
    ActionResponse { id: u64, output: ByteBuf },
    Event { name: String, args: ByteBuf },
    Error {
        group: String,
        code: String,
        message: String,
        metadata: Option<ByteBuf>,
        action_id: Option<u64>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct HttpActionRequestWire {
    args: ByteBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct HttpActionResponseWire {
    output: ByteBuf,
}

fn to_bytes<T: Serialize>(wire: &T) -> Result<Vec<u8>, WarrenError> {
    let body = serde_bare::to_vec(wire)
        .map_err(|e| WarrenError::internal(format!("bare encode: {e}")))?;
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WarrenError> {
    let body = check_version(bytes)?;
    serde_bare::from_slice(body).map_err(|e| WarrenError::malformed(format!("invalid bare: {e}")))
}

pub fn encode_to_client(msg: &ToClient) -> Result<Vec<u8>, WarrenError> {
    let wire = match msg {
        ToClient::Init { actor_id, connection_id, connection_token } => ToClientWire::Init {
            actor_id: actor_id.clone(),
            connection_id: connection_id.to_string(),
            connection_token: connection_token.clone(),
        },
        ToClient::ActionResponse { id, output } => {
            ToClientWire::ActionResponse { id: *id, output: value_to_cbor(output)? }
        }
        ToClient::Event { name, args } => {
            ToClientWire::Event { name: name.clone(), args: value_to_cbor(args)? }
        }
        ToClient::Error { group, code, message, metadata, action_id } => ToClientWire::Error {
            group: group.clone(),
            code: code.clone(),
            message: message.clone(),
            metadata: metadata.as_ref().map(value_to_cbor).transpose()?,
            action_id: *action_id,
        },
    };
    to_bytes(&wire)
}

pub fn decode_to_client(bytes: &[u8]) -> Result<ToClient, WarrenError> {
    let wire: ToClientWire = from_bytes(bytes)?;
    Ok(match wire {
        ToClientWire::Init { actor_id, connection_id, connection_token } => ToClient::Init {
            actor_id,
            connection_id: Uuid::parse_str(&connection_id)
                .map_err(|e| WarrenError::malformed(format!("invalid connection id: {e}")))?,
            connection_token,
        },
        ToClientWire::ActionResponse { id, output } => {
            ToClient::ActionResponse { id, output: value_from_cbor(&output)? }
        }
        ToClientWire::Event { name, args } => {
            ToClient::Event { name, args: value_from_cbor(&args)? }
        }
        ToClientWire::Error { group, code, message, metadata, action_id } => ToClient::Error {
            group,
            code,
            message,
            metadata: metadata.as_deref().map(|m| value_from_cbor(m)).transpose()?,
            action_id,
        },
    })
}

pub fn encode_to_server(msg: &ToServer) -> Result<Vec<u8>, WarrenError> {
    let wire = match msg {
        ToServer::ActionRequest { id, name, args } => {
            ToServerWire::ActionRequest { id: *id, name: name.clone(), args: value_to_cbor(args)? }
        }
        ToServer::SubscriptionRequest { event_name, subscribe } => {
            ToServerWire::SubscriptionRequest {
                event_name: event_name.clone(),
                subscribe: *subscribe,
            }
        }
    };
    to_bytes(&wire)
}

pub fn decode_to_server(bytes: &[u8]) -> Result<ToServer, WarrenError> {
    let wire: ToServerWire = from_bytes(bytes)?;
    Ok(match wire {
        ToServerWire::ActionRequest { id, name, args } => {
            ToServer::ActionRequest { id, name, args: value_from_cbor(&args)? }
        }
        ToServerWire::SubscriptionRequest { event_name, subscribe } => {
            ToServer::SubscriptionRequest { event_name, subscribe }
        }
    })
}

pub fn encode_http_request(req: &HttpActionRequest) -> Result<Vec<u8>, WarrenError> {
    to_bytes(&HttpActionRequestWire { args: value_to_cbor(&req.args)? })
}

pub fn decode_http_request(bytes: &[u8]) -> Result<HttpActionRequest, WarrenError> {
    let wire: HttpActionRequestWire = from_bytes(bytes)?;
    Ok(HttpActionRequest { args: value_from_cbor(&wire.args)? })
}

pub fn encode_http_response(resp: &HttpActionResponse) -> Result<Vec<u8>, WarrenError> {
    to_bytes(&HttpActionResponseWire { output: value_to_cbor(&resp.output)? })
}

pub fn decode_http_response(bytes: &[u8]) -> Result<HttpActionResponse, WarrenError> {
    let wire: HttpActionResponseWire = from_bytes(bytes)?;
    Ok(HttpActionResponse { output: value_from_cbor(&wire.output)? })
}
