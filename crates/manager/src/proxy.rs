// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proxy routing: rebuild requests toward the runner holding an actor.
//!
//! Incoming headers and URLs are never forwarded verbatim; only the
//! `x-rivet-*` set (plus the WebSocket protocol list, which carries the
//! handshake) crosses over.

use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, warn};
use uuid::Uuid;

use warren::actor::socket::{CLOSE_INTERNAL, CLOSE_NORMAL};
use warren::error::WarrenError;
use warren::protocol::{CachedSerializer, Encoding, ToClient};
use warren::transport::headers;

/// Headers copied from the incoming request onto the rebuilt one.
const FORWARDED: [&str; 4] =
    [headers::ENCODING, headers::CONN, headers::CONN_PARAMS, headers::CONN_TOKEN];

pub struct ProxyTarget {
    endpoint: String,
    client: reqwest::Client,
}

impl ProxyTarget {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let mut endpoint = endpoint.into();
        while endpoint.ends_with('/') {
            endpoint.pop();
        }
        Self { endpoint, client: reqwest::Client::new() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn ws_endpoint(&self) -> String {
        match self.endpoint.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => {
                format!("ws://{}", self.endpoint.strip_prefix("http://").unwrap_or(&self.endpoint))
            }
        }
    }

    /// Rebuild and forward a plain HTTP request; the response body streams
    /// back (which also covers SSE).
    pub async fn forward_http(
        &self,
        method: Method,
        path_and_query: &str,
        incoming: &HeaderMap,
        actor_id: Uuid,
        body: Bytes,
    ) -> Response {
        let url = format!("{}{}", self.endpoint, path_and_query);
        let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self.client.request(method, &url).body(body);
        for name in FORWARDED {
            if let Some(value) = incoming.get(name).and_then(|v| v.to_str().ok()) {
                request = request.header(name, value);
            }
        }
        request = request.header(headers::ACTOR, actor_id.to_string());

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %url, "proxy request failed: {err}");
                let err = WarrenError::internal(format!("proxy request failed: {err}"));
                return warren::transport::error_response(Encoding::Json, &err);
            }
        };

        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut builder = Response::builder().status(status);
        if let Some(content_type) =
            response.headers().get("content-type").and_then(|v| v.to_str().ok())
        {
            builder = builder.header("content-type", content_type);
        }
        builder
            .body(Body::from_stream(response.bytes_stream()))
            .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
    }

    /// Establish an upstream WebSocket and shuttle frames both ways.
    pub fn forward_websocket(
        &self,
        path: &str,
        protocol_header: Option<String>,
        actor_id: Option<Uuid>,
        encoding: Encoding,
        cloudflare_compat: bool,
        ws: WebSocketUpgrade,
    ) -> Response {
        let url = format!("{}{}", self.ws_endpoint(), path);
        ws.protocols([warren::transport::handshake::PROTOCOL_BASE])
            .on_upgrade(move |client| async move {
                proxy_ws(client, url, protocol_header, actor_id, encoding, cloudflare_compat)
                    .await;
            })
            .into_response()
    }
}

async fn proxy_ws(
    mut client: WebSocket,
    url: String,
    protocol_header: Option<String>,
    actor_id: Option<Uuid>,
    encoding: Encoding,
    cloudflare_compat: bool,
) {
    let mut request = match url.clone().into_client_request() {
        Ok(request) => request,
        Err(err) => {
            let err = WarrenError::internal(format!("invalid upstream url: {err}"));
            send_setup_error(&mut client, encoding, &err).await;
            return;
        }
    };
    if let Some(protocols) = &protocol_header {
        if let Ok(value) = HeaderValue::from_str(protocols) {
            request.headers_mut().insert("sec-websocket-protocol", value);
        }
    }
    if let Some(actor_id) = actor_id {
        if let Ok(value) = HeaderValue::from_str(&actor_id.to_string()) {
            request.headers_mut().insert(headers::ACTOR, value);
        }
    }

    let upstream = match connect_async(request).await {
        Ok((upstream, _response)) => upstream,
        Err(err) => {
            warn!(url = %url, "upstream websocket connect failed: {err}");
            let err = WarrenError::internal(format!("upstream connect failed: {err}"));
            send_setup_error(&mut client, encoding, &err).await;
            return;
        }
    };

    let (mut up_tx, mut up_rx) = upstream.split();
    let (mut cl_tx, mut cl_rx) = client.split();

    loop {
        tokio::select! {
            msg = cl_rx.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    if up_tx.send(tungstenite::Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    if up_tx.send(tungstenite::Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let frame = frame.map(|f| tungstenite::protocol::CloseFrame {
                        code: f.code.into(),
                        reason: f.reason.as_str().into(),
                    });
                    let _ = up_tx.send(tungstenite::Message::Close(frame)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = up_tx.send(tungstenite::Message::Close(None)).await;
                    break;
                }
            },

            msg = up_rx.next() => match msg {
                Some(Ok(tungstenite::Message::Binary(bytes))) => {
                    if cl_tx.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Text(text))) => {
                    if cl_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(tungstenite::Message::Close(frame))) => {
                    // Pass the upstream close through, except under the
                    // Cloudflare workaround which always closes with 1000.
                    let frame = if cloudflare_compat {
                        Some(CloseFrame { code: CLOSE_NORMAL, reason: "".into() })
                    } else {
                        frame.map(|f| CloseFrame {
                            code: f.code.into(),
                            reason: f.reason.as_str().into(),
                        })
                    };
                    let _ = cl_tx.send(Message::Close(frame)).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = cl_tx
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_INTERNAL,
                            reason: "upstream gone".into(),
                        })))
                        .await;
                    break;
                }
            },
        }
    }
    debug!(url = %url, "websocket proxy closed");
}

/// Setup failure after upgrade: `Error` frame, then close 1011.
async fn send_setup_error(client: &mut WebSocket, encoding: Encoding, err: &WarrenError) {
    let frame = CachedSerializer::new(ToClient::error(err, false, None));
    if let Ok(bytes) = frame.serialize(encoding) {
        let message = if encoding.is_binary() {
            Message::Binary(bytes)
        } else {
            Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
        };
        let _ = client.send(message).await;
    }
    let _ = client
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_INTERNAL,
            reason: format!("{}", err.code).into(),
        })))
        .await;
}
