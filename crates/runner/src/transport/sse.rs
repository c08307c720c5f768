// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SSE transport: server→client stream with a 1s keep-alive ping.
//!
//! Client→server messages arrive separately via
//! `POST /connections/message` carrying `(conn_id, token)` headers. A
//! dropped response body (client abort) detaches the connection
//! non-cleanly so it may reconnect within the liveness window.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::actor::socket::{CloseSignal, ConnSocket, SocketFrame};
use crate::actor::ActorInstance;
use crate::error::WarrenError;
use crate::protocol::{CachedSerializer, Encoding, ToClient};
use crate::runner::Runner;

/// `GET /connect/sse` — actor event stream.
pub async fn sse_connect(State(runner): State<Arc<Runner>>, headers: HeaderMap) -> Response {
    let encoding = super::encoding_from_headers(&headers).unwrap_or(Encoding::Json);

    match setup_conn(&runner, &headers, encoding).await {
        Ok(feed) => Sse::new(feed)
            .keep_alive(KeepAlive::new().interval(Duration::from_secs(1)).text("ping"))
            .into_response(),
        Err(err) => {
            // Pre-establishment errors travel inside the stream: one Error
            // frame, then the stream ends.
            let frame = CachedSerializer::new(ToClient::error(&err, false, None));
            let data = frame
                .serialize(encoding)
                .map(|bytes| encoding.frame_for_sse(&bytes))
                .unwrap_or_default();
            let stream =
                futures_util::stream::iter([Ok::<Event, Infallible>(Event::default().data(data))]);
            Sse::new(stream).into_response()
        }
    }
}

async fn setup_conn(
    runner: &Arc<Runner>,
    headers: &HeaderMap,
    encoding: Encoding,
) -> Result<SseFeed, WarrenError> {
    let actor_id = super::actor_id_from_headers(headers)?;
    let instance = runner.require(actor_id).await?;

    let max_params = instance.options().max_connection_params_size;
    let params = super::conn_params_from_headers(headers, max_params)?;
    let reconnect = super::reconnect_from_headers(headers)?;

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(CloseSignal::default());
    let socket = ConnSocket::sse(out_tx, Arc::clone(&closed));
    let socket_id = socket.socket_id();

    let conn_id = instance.create_conn(socket, encoding, params, reconnect).await?;
    debug!(conn_id = %conn_id, "sse connection established");

    Ok(SseFeed {
        rx: out_rx,
        encoding,
        done: false,
        guard: Some(DisconnectGuard { instance, conn_id, socket_id, closed, clean: false }),
    })
}

/// Bridges the connection's outgoing frame queue into SSE events. Binary
/// encodings are base64-framed in the `data:` field.
struct SseFeed {
    rx: mpsc::UnboundedReceiver<SocketFrame>,
    encoding: Encoding,
    done: bool,
    guard: Option<DisconnectGuard>,
}

impl Stream for SseFeed {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(SocketFrame::Message(bytes))) => {
                let data = self.encoding.frame_for_sse(&bytes);
                Poll::Ready(Some(Ok(Event::default().data(data))))
            }
            Poll::Ready(Some(SocketFrame::Close { .. })) => {
                self.done = true;
                if let Some(guard) = self.guard.as_mut() {
                    guard.clean = true;
                }
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Fires the disconnect exactly once when the stream is dropped — whether
/// the actor closed it or the client aborted the request.
struct DisconnectGuard {
    instance: Arc<ActorInstance>,
    conn_id: Uuid,
    socket_id: Uuid,
    closed: Arc<CloseSignal>,
    clean: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.closed.mark_closed();
        let instance = Arc::clone(&self.instance);
        let (conn_id, socket_id, clean) = (self.conn_id, self.socket_id, self.clean);
        tokio::spawn(async move {
            instance.conn_disconnected(conn_id, socket_id, clean).await;
        });
    }
}
