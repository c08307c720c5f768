// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket transport: duplex connection to one actor.
//!
//! Setup failures (unknown actor, bad token, oversized params) surface
//! inside the stream — an `Error` frame, then close 1011 with the code in
//! the reason — because the client cannot observe HTTP bodies once the
//! upgrade begins.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::actor::socket::{CloseSignal, ConnSocket, SocketFrame, CLOSE_INTERNAL, CLOSE_NORMAL};
use crate::actor::ActorInstance;
use crate::error::WarrenError;
use crate::protocol::{CachedSerializer, Encoding, ToClient};
use crate::runner::Runner;

use super::handshake::{parse_protocols, WsHandshake, PROTOCOL_BASE};

/// `GET /connect/websocket` — actor connection upgrade.
pub async fn ws_connect(
    State(runner): State<Arc<Runner>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let handshake = headers
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(parse_protocols)
        .unwrap_or_else(|| Ok(WsHandshake::default()));

    // The actor id may also arrive as a plain header (manager inline path).
    let header_actor = super::actor_id_from_headers(&headers).ok();

    ws.protocols([PROTOCOL_BASE])
        .on_upgrade(move |socket| serve_ws(runner, handshake, header_actor, socket))
        .into_response()
}

async fn serve_ws(
    runner: Arc<Runner>,
    handshake: Result<WsHandshake, WarrenError>,
    header_actor: Option<Uuid>,
    socket: WebSocket,
) {
    let (encoding, setup) = match setup_conn(&runner, handshake, header_actor).await {
        Ok(setup) => (setup.encoding, Ok(setup)),
        Err((encoding, err)) => (encoding, Err(err)),
    };

    let mut setup = match setup {
        Ok(setup) => setup,
        Err(err) => {
            send_setup_error(socket, encoding, &err).await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let instance = Arc::clone(&setup.instance);
    let conn_id = setup.conn_id;
    let socket_id = setup.socket_id;
    let max_message = instance.options().max_incoming_message_size;
    let mut clean = false;

    loop {
        tokio::select! {
            frame = setup.out_rx.recv() => match frame {
                Some(SocketFrame::Message(bytes)) => {
                    let message = if encoding.is_binary() {
                        Message::Binary(bytes)
                    } else {
                        Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
                    };
                    if ws_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Some(SocketFrame::Close { code, reason }) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame { code, reason: reason.into() })))
                        .await;
                    clean = true;
                    break;
                }
                None => break,
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    handle_incoming(&instance, conn_id, &bytes, encoding, max_message).await;
                }
                Some(Ok(Message::Text(text))) => {
                    handle_incoming(&instance, conn_id, text.as_bytes(), encoding, max_message)
                        .await;
                }
                Some(Ok(Message::Close(frame))) => {
                    clean = frame.map(|f| f.code == CLOSE_NORMAL).unwrap_or(false);
                    break;
                }
                Some(Ok(_)) => {} // ping/pong
                Some(Err(_)) | None => break,
            },
        }
    }

    setup.closed.mark_closed();
    instance.conn_disconnected(conn_id, socket_id, clean).await;
    debug!(conn_id = %conn_id, clean, "websocket closed");
}

struct WsSetup {
    instance: Arc<ActorInstance>,
    conn_id: Uuid,
    socket_id: Uuid,
    encoding: Encoding,
    out_rx: mpsc::UnboundedReceiver<SocketFrame>,
    closed: Arc<CloseSignal>,
}

async fn setup_conn(
    runner: &Arc<Runner>,
    handshake: Result<WsHandshake, WarrenError>,
    header_actor: Option<Uuid>,
) -> Result<WsSetup, (Encoding, WarrenError)> {
    let handshake = handshake.map_err(|e| (Encoding::Json, e))?;
    let encoding = handshake.encoding;
    let fail = |err| (encoding, err);

    let actor_id = handshake
        .actor_id
        .or(header_actor)
        .ok_or_else(|| fail(WarrenError::malformed("no actor id in handshake")))?;
    let instance = runner.require(actor_id).await.map_err(fail)?;

    let max_params = instance.options().max_connection_params_size;
    if handshake.params_len > max_params {
        return Err(fail(WarrenError::params_too_long(handshake.params_len, max_params)));
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(CloseSignal::default());
    let conn_socket = ConnSocket::websocket(out_tx, Arc::clone(&closed));
    let socket_id = conn_socket.socket_id();

    let conn_id = instance
        .create_conn(conn_socket, encoding, handshake.params.clone(), handshake.reconnect())
        .await
        .map_err(fail)?;

    Ok(WsSetup { instance, conn_id, socket_id, encoding, out_rx, closed })
}

async fn handle_incoming(
    instance: &Arc<ActorInstance>,
    conn_id: Uuid,
    bytes: &[u8],
    encoding: Encoding,
    max_message: usize,
) {
    if bytes.len() > max_message {
        let err = WarrenError::message_too_long(bytes.len(), max_message);
        instance.send_error(conn_id, &err, None).await;
        return;
    }
    let msg = match encoding.decode_to_server(bytes) {
        Ok(msg) => msg,
        Err(err) => {
            instance.send_error(conn_id, &err, None).await;
            return;
        }
    };
    if let Err(err) = instance.process_message(conn_id, msg).await {
        instance.send_error(conn_id, &err, None).await;
    }
}

/// Deliver a setup error in-stream: `Error` frame, then close 1011 with
/// the error code in the reason.
async fn send_setup_error(mut socket: WebSocket, encoding: Encoding, err: &WarrenError) {
    let frame = CachedSerializer::new(ToClient::error(err, false, None));
    if let Ok(bytes) = frame.serialize(encoding) {
        let message = if encoding.is_binary() {
            Message::Binary(bytes)
        } else {
            Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
        };
        let _ = socket.send(message).await;
    }
    let reason = format!("{}", err.code);
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code: CLOSE_INTERNAL, reason: reason.into() })))
        .await;
}
