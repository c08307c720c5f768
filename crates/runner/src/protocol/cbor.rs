// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CBOR wire encoding: the message tree is a CBOR map and dynamic payloads
//! embed natively. Messages carry the one-byte version envelope.

use crate::error::WarrenError;
use crate::protocol::{
    check_version, HttpActionRequest, HttpActionResponse, ToClient, ToServer, Value,
    PROTOCOL_VERSION,
};

fn entry(key: &str, value: Value) -> (Value, Value) {
    (Value::Text(key.to_owned()), value)
}

fn to_bytes(tree: &Value) -> Result<Vec<u8>, WarrenError> {
    let mut out = vec![PROTOCOL_VERSION];
    ciborium::into_writer(tree, &mut out)
        .map_err(|e| WarrenError::internal(format!("cbor encode: {e}")))?;
    Ok(out)
}

fn from_bytes(bytes: &[u8]) -> Result<Value, WarrenError> {
    let body = check_version(bytes)?;
    ciborium::from_reader(body).map_err(|e| WarrenError::malformed(format!("invalid cbor: {e}")))
}

fn get<'a>(entries: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    entries.iter().find_map(|(k, v)| match k {
        Value::Text(t) if t == key => Some(v),
        _ => None,
    })
}

fn get_text(entries: &[(Value, Value)], key: &str) -> Result<String, WarrenError> {
    match get(entries, key) {
        Some(Value::Text(t)) => Ok(t.clone()),
        _ => Err(WarrenError::malformed(format!("missing or non-text field {key}"))),
    }
}

fn get_u64(entries: &[(Value, Value)], key: &str) -> Result<u64, WarrenError> {
    match get(entries, key) {
        Some(Value::Integer(i)) => u64::try_from(i128::from(*i))
            .map_err(|_| WarrenError::malformed(format!("field {key} out of range"))),
        _ => Err(WarrenError::malformed(format!("missing or non-integer field {key}"))),
    }
}

pub fn encode_to_client(msg: &ToClient) -> Result<Vec<u8>, WarrenError> {
    let entries = match msg {
        ToClient::Init { actor_id, connection_id, connection_token } => vec![
            entry("type", Value::Text("init".to_owned())),
            entry("actor_id", Value::Text(actor_id.clone())),
            entry("connection_id", Value::Text(connection_id.to_string())),
            entry("connection_token", Value::Text(connection_token.clone())),
        ],
        ToClient::ActionResponse { id, output } => vec![
            entry("type", Value::Text("action_response".to_owned())),
            entry("id", Value::Integer((*id).into())),
            entry("output", output.clone()),
        ],
        ToClient::Event { name, args } => vec![
            entry("type", Value::Text("event".to_owned())),
            entry("name", Value::Text(name.clone())),
            entry("args", args.clone()),
        ],
        ToClient::Error { group, code, message, metadata, action_id } => {
            let mut entries = vec![
                entry("type", Value::Text("error".to_owned())),
                entry("group", Value::Text(group.clone())),
                entry("code", Value::Text(code.clone())),
                entry("message", Value::Text(message.clone())),
            ];
            if let Some(meta) = metadata {
                entries.push(entry("metadata", meta.clone()));
            }
            if let Some(id) = action_id {
                entries.push(entry("action_id", Value::Integer((*id).into())));
            }
            entries
        }
    };
    to_bytes(&Value::Map(entries))
}

pub fn encode_to_server(msg: &ToServer) -> Result<Vec<u8>, WarrenError> {
    let entries = match msg {
        ToServer::ActionRequest { id, name, args } => vec![
            entry("type", Value::Text("action_request".to_owned())),
            entry("id", Value::Integer((*id).into())),
            entry("name", Value::Text(name.clone())),
            entry("args", args.clone()),
        ],
        ToServer::SubscriptionRequest { event_name, subscribe } => vec![
            entry("type", Value::Text("subscription_request".to_owned())),
            entry("event_name", Value::Text(event_name.clone())),
            entry("subscribe", Value::Bool(*subscribe)),
        ],
    };
    to_bytes(&Value::Map(entries))
}

pub fn decode_to_client(bytes: &[u8]) -> Result<ToClient, WarrenError> {
    let Value::Map(entries) = from_bytes(bytes)? else {
        return Err(WarrenError::malformed("message is not a map"));
    };
    match get_text(&entries, "type")?.as_str() {
        "init" => Ok(ToClient::Init {
            actor_id: get_text(&entries, "actor_id")?,
            connection_id: uuid::Uuid::parse_str(&get_text(&entries, "connection_id")?)
                .map_err(|e| WarrenError::malformed(format!("invalid connection id: {e}")))?,
            connection_token: get_text(&entries, "connection_token")?,
        }),
        "action_response" => Ok(ToClient::ActionResponse {
            id: get_u64(&entries, "id")?,
            output: get(&entries, "output").cloned().unwrap_or(Value::Null),
        }),
        "event" => Ok(ToClient::Event {
            name: get_text(&entries, "name")?,
            args: get(&entries, "args").cloned().unwrap_or(Value::Null),
        }),
        "error" => Ok(ToClient::Error {
            group: get_text(&entries, "group")?,
            code: get_text(&entries, "code")?,
            message: get_text(&entries, "message")?,
            metadata: get(&entries, "metadata").cloned(),
            action_id: get_u64(&entries, "action_id").ok(),
        }),
        other => Err(WarrenError::malformed(format!("unknown message type {other}"))),
    }
}

pub fn decode_to_server(bytes: &[u8]) -> Result<ToServer, WarrenError> {
    let Value::Map(entries) = from_bytes(bytes)? else {
        return Err(WarrenError::malformed("message is not a map"));
    };
    match get_text(&entries, "type")?.as_str() {
        "action_request" => Ok(ToServer::ActionRequest {
            id: get_u64(&entries, "id")?,
            name: get_text(&entries, "name")?,
            args: get(&entries, "args").cloned().unwrap_or(Value::Null),
        }),
        "subscription_request" => {
            let subscribe = match get(&entries, "subscribe") {
                Some(Value::Bool(b)) => *b,
                _ => return Err(WarrenError::malformed("subscription_request has no subscribe")),
            };
            Ok(ToServer::SubscriptionRequest {
                event_name: get_text(&entries, "event_name")?,
                subscribe,
            })
        }
        other => Err(WarrenError::malformed(format!("unknown message type {other}"))),
    }
}

pub fn encode_http_request(req: &HttpActionRequest) -> Result<Vec<u8>, WarrenError> {
    to_bytes(&Value::Map(vec![entry("args", req.args.clone())]))
}

pub fn decode_http_request(bytes: &[u8]) -> Result<HttpActionRequest, WarrenError> {
    let Value::Map(entries) = from_bytes(bytes)? else {
        return Err(WarrenError::malformed("request is not a map"));
    };
    Ok(HttpActionRequest { args: get(&entries, "args").cloned().unwrap_or(Value::Null) })
}

pub fn encode_http_response(resp: &HttpActionResponse) -> Result<Vec<u8>, WarrenError> {
    to_bytes(&Value::Map(vec![entry("output", resp.output.clone())]))
}

pub fn decode_http_response(bytes: &[u8]) -> Result<HttpActionResponse, WarrenError> {
    let Value::Map(entries) = from_bytes(bytes)? else {
        return Err(WarrenError::malformed("response is not a map"));
    };
    Ok(HttpActionResponse { output: get(&entries, "output").cloned().unwrap_or(Value::Null) })
}
