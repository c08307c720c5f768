// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::{CachedSerializer, Encoding, ToClient, Value};

use super::{CloseSignal, ConnSocket, ReadyState, SocketFrame, CLOSE_NORMAL};

fn event() -> CachedSerializer {
    CachedSerializer::new(ToClient::Event { name: "tick".to_owned(), args: Value::Null })
}

#[tokio::test]
async fn websocket_send_queues_encoded_frame() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let socket = ConnSocket::websocket(tx, Arc::new(CloseSignal::default()));

    socket.send(&event(), Encoding::Json).unwrap();
    let SocketFrame::Message(bytes) = rx.recv().await.unwrap() else {
        panic!("expected a message frame");
    };
    let decoded = Encoding::Json.decode_to_client(&bytes).unwrap();
    assert!(matches!(decoded, ToClient::Event { .. }));
}

#[tokio::test]
async fn disconnect_queues_normal_close() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let socket = ConnSocket::websocket(tx, Arc::new(CloseSignal::default()));

    socket.disconnect(Some("bye"));
    let SocketFrame::Close { code, reason } = rx.recv().await.unwrap() else {
        panic!("expected a close frame");
    };
    assert_eq!(code, CLOSE_NORMAL);
    assert_eq!(reason, "bye");
}

#[tokio::test]
async fn ready_state_tracks_close_signal() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let closed = Arc::new(CloseSignal::default());
    let socket = ConnSocket::websocket(tx, Arc::clone(&closed));

    assert_eq!(socket.ready_state(), ReadyState::Open);
    closed.mark_closed();
    assert_eq!(socket.ready_state(), ReadyState::Closed);
}

#[tokio::test]
async fn wait_closed_resolves_after_mark() {
    let closed = Arc::new(CloseSignal::default());
    let waiter = {
        let closed = Arc::clone(&closed);
        tokio::spawn(async move { closed.wait().await })
    };
    closed.mark_closed();
    waiter.await.unwrap();
}

#[tokio::test]
async fn http_socket_rejects_sends_and_closes_inline() {
    let socket = ConnSocket::http();
    assert!(socket.send(&event(), Encoding::Json).is_err());
    assert_eq!(socket.ready_state(), ReadyState::Open);
    socket.disconnect(None);
    assert_eq!(socket.ready_state(), ReadyState::Closed);
    socket.wait_closed().await;
}

#[tokio::test]
async fn send_fails_once_receiver_dropped() {
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);
    let socket = ConnSocket::sse(tx, Arc::new(CloseSignal::default()));
    assert!(socket.send(&event(), Encoding::Json).is_err());
    assert_eq!(socket.ready_state(), ReadyState::Closed);
}
