// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified error model shared across the actor runtime and every transport.
//!
//! Every wire-visible failure carries a `group/code` pair, a message, and
//! optional structured metadata. Non-public errors are redacted before they
//! leave the process unless `expose_internal_error` is enabled.

use std::fmt;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// Machine-readable error codes, grouped by subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    ActorNotFound,
    ActorAlreadyExists,
    ActorStateNotEnabled,
    ConnectionNotFound,
    ConnectionIncorrectToken,
    ConnectionParamsTooLong,
    ParamsInvalid,
    ActionNotFound,
    ActionTimedOut,
    ActionInvalidRequest,
    EncodingInvalid,
    MessageTooLong,
    MessageMalformed,
    StateInvalidType,
    FetchNotDefined,
    WebSocketNotDefined,
    InvalidFetchResponse,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ErrorCode {
    /// The taxonomy group this code belongs to.
    pub fn group(&self) -> &'static str {
        match self {
            Self::ActorNotFound
            | Self::ActorAlreadyExists
            | Self::ActorStateNotEnabled
            | Self::Internal => "actor",
            Self::ConnectionNotFound
            | Self::ConnectionIncorrectToken
            | Self::ConnectionParamsTooLong => "connection",
            Self::ParamsInvalid => "params",
            Self::ActionNotFound | Self::ActionTimedOut | Self::ActionInvalidRequest => "action",
            Self::EncodingInvalid => "encoding",
            Self::MessageTooLong | Self::MessageMalformed => "message",
            Self::StateInvalidType => "state",
            Self::FetchNotDefined | Self::WebSocketNotDefined | Self::InvalidFetchResponse => {
                "handler"
            }
            Self::Unauthorized | Self::Forbidden => "auth",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::ActorNotFound => "not_found",
            Self::ActorAlreadyExists => "already_exists",
            Self::ActorStateNotEnabled => "state_not_enabled",
            Self::ConnectionNotFound => "not_found",
            Self::ConnectionIncorrectToken => "incorrect_token",
            Self::ConnectionParamsTooLong => "params_too_long",
            Self::ParamsInvalid => "invalid",
            Self::ActionNotFound => "not_found",
            Self::ActionTimedOut => "timed_out",
            Self::ActionInvalidRequest => "invalid_request",
            Self::EncodingInvalid => "invalid",
            Self::MessageTooLong => "too_long",
            Self::MessageMalformed => "malformed",
            Self::StateInvalidType => "invalid_type",
            Self::FetchNotDefined => "fetch_not_defined",
            Self::WebSocketNotDefined => "websocket_not_defined",
            Self::InvalidFetchResponse => "invalid_fetch_response",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::ActorNotFound | Self::ConnectionNotFound | Self::ActionNotFound => 404,
            Self::FetchNotDefined | Self::WebSocketNotDefined => 501,
            Self::Internal => 500,
            _ => 400,
        }
    }

    /// Whether the message may cross the wire unredacted.
    pub fn is_public(&self) -> bool {
        !matches!(self, Self::Internal)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group(), self.code())
    }
}

/// A wire-visible runtime error.
#[derive(Debug, Clone)]
pub struct WarrenError {
    pub code: ErrorCode,
    pub message: String,
    pub metadata: Option<ciborium::Value>,
}

impl WarrenError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), metadata: None }
    }

    pub fn with_metadata(mut self, metadata: ciborium::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn actor_not_found(actor_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ActorNotFound, format!("actor not found: {actor_id}"))
    }

    pub fn actor_already_exists(name: &str) -> Self {
        Self::new(ErrorCode::ActorAlreadyExists, format!("actor already exists: {name}"))
    }

    pub fn connection_not_found(conn_id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ConnectionNotFound, format!("connection not found: {conn_id}"))
    }

    pub fn incorrect_token() -> Self {
        Self::new(ErrorCode::ConnectionIncorrectToken, "connection token does not match")
    }

    pub fn params_too_long(size: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::ConnectionParamsTooLong,
            format!("connection params are {size} bytes, maximum is {max}"),
        )
    }

    pub fn action_not_found(name: &str) -> Self {
        Self::new(ErrorCode::ActionNotFound, format!("action not found: {name}"))
    }

    pub fn action_timed_out(name: &str) -> Self {
        Self::new(ErrorCode::ActionTimedOut, format!("action timed out: {name}"))
    }

    pub fn encoding_invalid(raw: &str) -> Self {
        Self::new(ErrorCode::EncodingInvalid, format!("unknown encoding: {raw}"))
    }

    pub fn message_too_long(size: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::MessageTooLong,
            format!("message is {size} bytes, maximum is {max}"),
        )
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(ErrorCode::MessageMalformed, detail)
    }

    /// `state/invalid_type` with the offending path in the metadata.
    pub fn invalid_state_type(path: &str) -> Self {
        Self::new(ErrorCode::StateInvalidType, format!("state is not serializable at {path}"))
            .with_metadata(ciborium::Value::Map(vec![(
                ciborium::Value::Text("path".to_owned()),
                ciborium::Value::Text(path.to_owned()),
            )]))
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "unauthorized")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Redact a non-public message unless internal errors are exposed.
    pub fn for_wire(&self, expose_internal: bool) -> Self {
        if self.code.is_public() || expose_internal {
            self.clone()
        } else {
            Self::new(self.code, "internal error")
        }
    }

    pub fn http_status(&self) -> StatusCode {
        StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for WarrenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for WarrenError {}

/// Wire body for HTTP error responses (serialized in the request's
/// negotiated encoding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponseError {
    pub group: String,
    pub code: String,
    pub message: String,
}

impl From<&WarrenError> for HttpResponseError {
    fn from(err: &WarrenError) -> Self {
        Self {
            group: err.code.group().to_owned(),
            code: err.code.code().to_owned(),
            message: err.message.clone(),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
