// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON wire encoding.
//!
//! JSON cannot carry bytes, big integers, or CBOR tags natively, so those
//! extend the primitive set via a `["$<tag>", payload]` escape:
//!
//! - `["$bytes", "<base64>"]` — byte strings
//! - `["$bigint", "<decimal>"]` — integers outside the i64/u64 JSON range
//! - `["$bignum", "[-]<base64>"]` — CBOR tag 2/3 arbitrary-precision magnitudes
//! - `["$tag", n, value]` — any other CBOR tag
//! - `["$array", [...]]` — double-escape for user arrays whose first
//!   element is itself a `$`-prefixed string
//!
//! Unknown `$` tags are rejected as malformed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;

use crate::error::WarrenError;
use crate::protocol::{
    HttpActionRequest, HttpActionResponse, ToClient, ToServer, Value, PROTOCOL_VERSION,
};

/// Convert a dynamic CBOR value to its escaped JSON form.
pub fn value_to_json(value: &Value) -> Result<serde_json::Value, WarrenError> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(b) => Ok(json!(b)),
        Value::Integer(i) => {
            let wide = i128::from(*i);
            if let Ok(n) = i64::try_from(wide) {
                Ok(json!(n))
            } else if let Ok(n) = u64::try_from(wide) {
                Ok(json!(n))
            } else {
                Ok(json!(["$bigint", wide.to_string()]))
            }
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| WarrenError::malformed("non-finite float is not representable")),
        Value::Text(s) => Ok(json!(s)),
        Value::Bytes(b) => Ok(json!(["$bytes", BASE64.encode(b)])),
        Value::Tag(2, inner) => bignum_to_json(inner, ""),
        Value::Tag(3, inner) => bignum_to_json(inner, "-"),
        Value::Tag(tag, inner) => Ok(json!(["$tag", tag, value_to_json(inner)?])),
        Value::Array(items) => {
            let converted =
                items.iter().map(value_to_json).collect::<Result<Vec<_>, WarrenError>>()?;
            // A user array whose first element is a `$`-string would collide
            // with our escapes, so it gets one extra level of wrapping.
            if matches!(items.first(), Some(Value::Text(s)) if s.starts_with('$')) {
                Ok(json!(["$array", converted]))
            } else {
                Ok(serde_json::Value::Array(converted))
            }
        }
        Value::Map(entries) => {
            let mut obj = serde_json::Map::with_capacity(entries.len());
            for (key, val) in entries {
                let Value::Text(key) = key else {
                    return Err(WarrenError::malformed("map key is not a string"));
                };
                obj.insert(key.clone(), value_to_json(val)?);
            }
            Ok(serde_json::Value::Object(obj))
        }
        _ => Err(WarrenError::malformed("unsupported value kind")),
    }
}

fn bignum_to_json(inner: &Value, sign: &str) -> Result<serde_json::Value, WarrenError> {
    let Value::Bytes(magnitude) = inner else {
        return Err(WarrenError::malformed("bignum tag does not wrap bytes"));
    };
    Ok(json!(["$bignum", format!("{sign}{}", BASE64.encode(magnitude))]))
}

/// Convert escaped JSON back to a dynamic CBOR value.
pub fn value_from_json(json: &serde_json::Value) -> Result<Value, WarrenError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(Value::Integer(u.into()))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(WarrenError::malformed("unrepresentable number"))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
        serde_json::Value::Array(items) => match items.first() {
            Some(serde_json::Value::String(tag)) if tag.starts_with('$') => {
                unescape_tagged(tag, items)
            }
            _ => Ok(Value::Array(
                items.iter().map(value_from_json).collect::<Result<Vec<_>, WarrenError>>()?,
            )),
        },
        serde_json::Value::Object(obj) => Ok(Value::Map(
            obj.iter()
                .map(|(k, v)| Ok((Value::Text(k.clone()), value_from_json(v)?)))
                .collect::<Result<Vec<_>, WarrenError>>()?,
        )),
    }
}

fn unescape_tagged(tag: &str, items: &[serde_json::Value]) -> Result<Value, WarrenError> {
    let payload = items
        .get(1)
        .ok_or_else(|| WarrenError::malformed(format!("{tag} escape is missing its payload")))?;
    match tag {
        "$bytes" => {
            let text = payload
                .as_str()
                .ok_or_else(|| WarrenError::malformed("$bytes payload is not a string"))?;
            let bytes = BASE64
                .decode(text)
                .map_err(|e| WarrenError::malformed(format!("invalid base64: {e}")))?;
            Ok(Value::Bytes(bytes))
        }
        "$bigint" => {
            let text = payload
                .as_str()
                .ok_or_else(|| WarrenError::malformed("$bigint payload is not a string"))?;
            let wide: i128 = text
                .parse()
                .map_err(|e| WarrenError::malformed(format!("invalid bigint: {e}")))?;
            let int = ciborium::value::Integer::try_from(wide)
                .map_err(|_| WarrenError::malformed("bigint out of CBOR integer range"))?;
            Ok(Value::Integer(int))
        }
        "$bignum" => {
            let text = payload
                .as_str()
                .ok_or_else(|| WarrenError::malformed("$bignum payload is not a string"))?;
            let (cbor_tag, b64) = match text.strip_prefix('-') {
                Some(rest) => (3, rest),
                None => (2, text),
            };
            let magnitude = BASE64
                .decode(b64)
                .map_err(|e| WarrenError::malformed(format!("invalid base64: {e}")))?;
            Ok(Value::Tag(cbor_tag, Box::new(Value::Bytes(magnitude))))
        }
        "$tag" => {
            let number = items
                .get(1)
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| WarrenError::malformed("$tag number is not an integer"))?;
            let inner = items
                .get(2)
                .ok_or_else(|| WarrenError::malformed("$tag escape is missing its value"))?;
            Ok(Value::Tag(number, Box::new(value_from_json(inner)?)))
        }
        "$array" => {
            let inner = payload
                .as_array()
                .ok_or_else(|| WarrenError::malformed("$array payload is not an array"))?;
            Ok(Value::Array(
                inner.iter().map(value_from_json).collect::<Result<Vec<_>, WarrenError>>()?,
            ))
        }
        other => Err(WarrenError::malformed(format!("unknown escape tag {other}"))),
    }
}

// -- Message envelopes --------------------------------------------------------

pub fn encode_to_client(msg: &ToClient) -> Result<Vec<u8>, WarrenError> {
    let body = match msg {
        ToClient::Init { actor_id, connection_id, connection_token } => json!({
            "v": PROTOCOL_VERSION,
            "type": "init",
            "actor_id": actor_id,
            "connection_id": connection_id.to_string(),
            "connection_token": connection_token,
        }),
        ToClient::ActionResponse { id, output } => json!({
            "v": PROTOCOL_VERSION,
            "type": "action_response",
            "id": id,
            "output": value_to_json(output)?,
        }),
        ToClient::Event { name, args } => json!({
            "v": PROTOCOL_VERSION,
            "type": "event",
            "name": name,
            "args": value_to_json(args)?,
        }),
        ToClient::Error { group, code, message, metadata, action_id } => {
            let mut obj = json!({
                "v": PROTOCOL_VERSION,
                "type": "error",
                "group": group,
                "code": code,
                "message": message,
            });
            if let Some(meta) = metadata {
                obj["metadata"] = value_to_json(meta)?;
            }
            if let Some(id) = action_id {
                obj["action_id"] = json!(id);
            }
            obj
        }
    };
    serde_json::to_vec(&body).map_err(|e| WarrenError::internal(format!("json encode: {e}")))
}

pub fn encode_to_server(msg: &ToServer) -> Result<Vec<u8>, WarrenError> {
    let body = match msg {
        ToServer::ActionRequest { id, name, args } => json!({
            "v": PROTOCOL_VERSION,
            "type": "action_request",
            "id": id,
            "name": name,
            "args": value_to_json(args)?,
        }),
        ToServer::SubscriptionRequest { event_name, subscribe } => json!({
            "v": PROTOCOL_VERSION,
            "type": "subscription_request",
            "event_name": event_name,
            "subscribe": subscribe,
        }),
    };
    serde_json::to_vec(&body).map_err(|e| WarrenError::internal(format!("json encode: {e}")))
}

pub fn decode_to_client(bytes: &[u8]) -> Result<ToClient, WarrenError> {
    let body: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| WarrenError::malformed(format!("invalid json: {e}")))?;
    check_json_version(&body)?;
    let kind = body
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| WarrenError::malformed("message has no type"))?;
    let text = |key: &str| -> Result<String, WarrenError> {
        body.get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| WarrenError::malformed(format!("missing field {key}")))
    };
    match kind {
        "init" => Ok(ToClient::Init {
            actor_id: text("actor_id")?,
            connection_id: uuid::Uuid::parse_str(&text("connection_id")?)
                .map_err(|e| WarrenError::malformed(format!("invalid connection id: {e}")))?,
            connection_token: text("connection_token")?,
        }),
        "action_response" => Ok(ToClient::ActionResponse {
            id: body
                .get("id")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| WarrenError::malformed("action_response has no id"))?,
            output: value_from_json(body.get("output").unwrap_or(&serde_json::Value::Null))?,
        }),
        "event" => Ok(ToClient::Event {
            name: text("name")?,
            args: value_from_json(body.get("args").unwrap_or(&serde_json::Value::Null))?,
        }),
        "error" => Ok(ToClient::Error {
            group: text("group")?,
            code: text("code")?,
            message: text("message")?,
            metadata: body.get("metadata").map(value_from_json).transpose()?,
            action_id: body.get("action_id").and_then(serde_json::Value::as_u64),
        }),
        other => Err(WarrenError::malformed(format!("unknown message type {other}"))),
    }
}

pub fn decode_to_server(bytes: &[u8]) -> Result<ToServer, WarrenError> {
    let body: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| WarrenError::malformed(format!("invalid json: {e}")))?;
    check_json_version(&body)?;
    let kind = body
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| WarrenError::malformed("message has no type"))?;
    match kind {
        "action_request" => {
            let id = body
                .get("id")
                .and_then(serde_json::Value::as_u64)
                .ok_or_else(|| WarrenError::malformed("action_request has no id"))?;
            let name = body
                .get("name")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| WarrenError::malformed("action_request has no name"))?;
            let args = value_from_json(body.get("args").unwrap_or(&serde_json::Value::Null))?;
            Ok(ToServer::ActionRequest { id, name: name.to_owned(), args })
        }
        "subscription_request" => {
            let event_name = body
                .get("event_name")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| WarrenError::malformed("subscription_request has no event_name"))?;
            let subscribe = body
                .get("subscribe")
                .and_then(serde_json::Value::as_bool)
                .ok_or_else(|| WarrenError::malformed("subscription_request has no subscribe"))?;
            Ok(ToServer::SubscriptionRequest { event_name: event_name.to_owned(), subscribe })
        }
        other => Err(WarrenError::malformed(format!("unknown message type {other}"))),
    }
}

pub fn encode_http_request(req: &HttpActionRequest) -> Result<Vec<u8>, WarrenError> {
    let body = json!({ "v": PROTOCOL_VERSION, "args": value_to_json(&req.args)? });
    serde_json::to_vec(&body).map_err(|e| WarrenError::internal(format!("json encode: {e}")))
}

pub fn decode_http_request(bytes: &[u8]) -> Result<HttpActionRequest, WarrenError> {
    let body: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| WarrenError::malformed(format!("invalid json: {e}")))?;
    check_json_version(&body)?;
    let args = value_from_json(body.get("args").unwrap_or(&serde_json::Value::Null))?;
    Ok(HttpActionRequest { args })
}

pub fn encode_http_response(resp: &HttpActionResponse) -> Result<Vec<u8>, WarrenError> {
    let body = json!({ "v": PROTOCOL_VERSION, "output": value_to_json(&resp.output)? });
    serde_json::to_vec(&body).map_err(|e| WarrenError::internal(format!("json encode: {e}")))
}

pub fn decode_http_response(bytes: &[u8]) -> Result<HttpActionResponse, WarrenError> {
    let body: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| WarrenError::malformed(format!("invalid json: {e}")))?;
    check_json_version(&body)?;
    let output = value_from_json(body.get("output").unwrap_or(&serde_json::Value::Null))?;
    Ok(HttpActionResponse { output })
}

fn check_json_version(body: &serde_json::Value) -> Result<(), WarrenError> {
    match body.get("v").and_then(serde_json::Value::as_u64) {
        Some(v) if v == u64::from(PROTOCOL_VERSION) => Ok(()),
        Some(v) => Err(WarrenError::malformed(format!("unknown protocol version {v}"))),
        None => Err(WarrenError::malformed("message has no version")),
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
