// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Encoding negotiation and per-encoding dispatch.
//!
//! The encoding is negotiated at handshake and fixed for the connection's
//! life. `CachedSerializer` memoizes serialized output so a broadcast to N
//! subscribers serializes at most once per encoding.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::WarrenError;
use crate::protocol::{bare, cbor, json, HttpActionRequest, HttpActionResponse, ToClient, ToServer};

/// Wire serialization negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Cbor,
    Bare,
}

impl std::str::FromStr for Encoding {
    type Err = WarrenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "json" => Ok(Self::Json),
            "cbor" => Ok(Self::Cbor),
            "bare" => Ok(Self::Bare),
            other => Err(WarrenError::encoding_invalid(other)),
        }
    }
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Cbor => "cbor",
            Self::Bare => "bare",
        }
    }

    /// Binary encodings need base64 framing on text transports.
    pub fn is_binary(&self) -> bool {
        !matches!(self, Self::Json)
    }

    fn index(&self) -> usize {
        match self {
            Self::Json => 0,
            Self::Cbor => 1,
            Self::Bare => 2,
        }
    }

    pub fn encode_to_client(&self, msg: &ToClient) -> Result<Vec<u8>, WarrenError> {
        match self {
            Self::Json => json::encode_to_client(msg),
            Self::Cbor => cbor::encode_to_client(msg),
            Self::Bare => bare::encode_to_client(msg),
        }
    }

    pub fn decode_to_client(&self, bytes: &[u8]) -> Result<ToClient, WarrenError> {
        match self {
            Self::Json => json::decode_to_client(bytes),
            Self::Cbor => cbor::decode_to_client(bytes),
            Self::Bare => bare::decode_to_client(bytes),
        }
    }

    pub fn encode_to_server(&self, msg: &ToServer) -> Result<Vec<u8>, WarrenError> {
        match self {
            Self::Json => json::encode_to_server(msg),
            Self::Cbor => cbor::encode_to_server(msg),
            Self::Bare => bare::encode_to_server(msg),
        }
    }

    pub fn decode_to_server(&self, bytes: &[u8]) -> Result<ToServer, WarrenError> {
        match self {
            Self::Json => json::decode_to_server(bytes),
            Self::Cbor => cbor::decode_to_server(bytes),
            Self::Bare => bare::decode_to_server(bytes),
        }
    }

    pub fn encode_http_request(&self, req: &HttpActionRequest) -> Result<Vec<u8>, WarrenError> {
        match self {
            Self::Json => json::encode_http_request(req),
            Self::Cbor => cbor::encode_http_request(req),
            Self::Bare => bare::encode_http_request(req),
        }
    }

    pub fn decode_http_request(&self, bytes: &[u8]) -> Result<HttpActionRequest, WarrenError> {
        match self {
            Self::Json => json::decode_http_request(bytes),
            Self::Cbor => cbor::decode_http_request(bytes),
            Self::Bare => bare::decode_http_request(bytes),
        }
    }

    pub fn encode_http_response(&self, resp: &HttpActionResponse) -> Result<Vec<u8>, WarrenError> {
        match self {
            Self::Json => json::encode_http_response(resp),
            Self::Cbor => cbor::encode_http_response(resp),
            Self::Bare => bare::encode_http_response(resp),
        }
    }

    pub fn decode_http_response(&self, bytes: &[u8]) -> Result<HttpActionResponse, WarrenError> {
        match self {
            Self::Json => json::decode_http_response(bytes),
            Self::Cbor => cbor::decode_http_response(bytes),
            Self::Bare => bare::decode_http_response(bytes),
        }
    }

    /// Serialize an error body in this encoding for an HTTP response.
    pub fn encode_http_error(&self, err: &WarrenError) -> Vec<u8> {
        let body = crate::error::HttpResponseError::from(err);
        let encoded = match self {
            Self::Json => serde_json::to_vec(&body).ok(),
            Self::Cbor => {
                let mut out = Vec::new();
                ciborium::into_writer(&body, &mut out).ok().map(|()| out)
            }
            Self::Bare => serde_bare::to_vec(&body).ok(),
        };
        encoded.unwrap_or_default()
    }

    /// Frame an already-encoded message for an SSE `data:` field. Binary
    /// encodings are base64-framed; JSON passes through as text.
    pub fn frame_for_sse(&self, bytes: &[u8]) -> String {
        if self.is_binary() {
            BASE64.encode(bytes)
        } else {
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Memoizes the serialized form of one `ToClient` message per encoding.
///
/// Shared across every subscriber of a broadcast; the message itself is
/// serialized at most once per encoding regardless of fan-out width.
pub struct CachedSerializer {
    message: ToClient,
    cache: parking_lot::Mutex<[Option<Bytes>; 3]>,
}

impl CachedSerializer {
    pub fn new(message: ToClient) -> Self {
        Self { message, cache: parking_lot::Mutex::new([None, None, None]) }
    }

    pub fn message(&self) -> &ToClient {
        &self.message
    }

    pub fn serialize(&self, encoding: Encoding) -> Result<Bytes, WarrenError> {
        let mut cache = self.cache.lock();
        let slot = &mut cache[encoding.index()];
        if let Some(bytes) = slot {
            return Ok(bytes.clone());
        }
        let bytes = Bytes::from(encoding.encode_to_client(&self.message)?);
        *slot = Some(bytes.clone());
        Ok(bytes)
    }
}

#[cfg(test)]
#[path = "encoding_tests.rs"]
mod tests;
