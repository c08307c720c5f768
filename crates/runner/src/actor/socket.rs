// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport adapters.
//!
//! Every connection binds at most one socket. The three drivers share one
//! contract: queue an encoded message, request a disconnect, report ready
//! state. Sends never suspend; the transport task drains the queue into
//! the real stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::WarrenError;
use crate::protocol::{CachedSerializer, Encoding};

/// Close code for a clean disconnect.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code for setup errors surfaced inside the stream.
pub const CLOSE_INTERNAL: u16 = 1011;

/// A frame queued toward the transport task.
#[derive(Debug, Clone)]
pub enum SocketFrame {
    Message(Bytes),
    Close { code: u16, reason: String },
}

/// Ready state of a bound socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
    Unknown,
}

/// Set by the transport task when the peer is gone; lets `disconnect`
/// resolve only once the socket actually closed.
#[derive(Default, Debug)]
pub struct CloseSignal {
    done: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn mark_closed(&self) {
        self.done.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        while !self.is_closed() {
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug)]
enum SocketDriver {
    /// Duplex WebSocket; frames drain into the upgrade task.
    WebSocket { tx: mpsc::UnboundedSender<SocketFrame> },
    /// Server→client event stream; binary frames are base64-framed by the
    /// SSE task.
    Sse { tx: mpsc::UnboundedSender<SocketFrame> },
    /// Ephemeral single-action connection; nothing to send through.
    Http,
}

/// One live socket bound to a connection.
#[derive(Debug)]
pub struct ConnSocket {
    socket_id: Uuid,
    driver: SocketDriver,
    closed: Arc<CloseSignal>,
}

impl ConnSocket {
    pub fn websocket(tx: mpsc::UnboundedSender<SocketFrame>, closed: Arc<CloseSignal>) -> Self {
        Self { socket_id: Uuid::new_v4(), driver: SocketDriver::WebSocket { tx }, closed }
    }

    pub fn sse(tx: mpsc::UnboundedSender<SocketFrame>, closed: Arc<CloseSignal>) -> Self {
        Self { socket_id: Uuid::new_v4(), driver: SocketDriver::Sse { tx }, closed }
    }

    pub fn http() -> Self {
        Self {
            socket_id: Uuid::new_v4(),
            driver: SocketDriver::Http,
            closed: Arc::new(CloseSignal::default()),
        }
    }

    pub fn socket_id(&self) -> Uuid {
        self.socket_id
    }

    /// Whether the driver can carry server→client frames at all.
    pub fn supports_frames(&self) -> bool {
        !matches!(self.driver, SocketDriver::Http)
    }

    /// Queue a message, serializing it (through the per-encoding cache)
    /// for this connection's encoding.
    pub fn send(
        &self,
        message: &CachedSerializer,
        encoding: Encoding,
    ) -> Result<(), WarrenError> {
        let bytes = message.serialize(encoding)?;
        match &self.driver {
            SocketDriver::WebSocket { tx } | SocketDriver::Sse { tx } => tx
                .send(SocketFrame::Message(bytes))
                .map_err(|_| WarrenError::internal("socket is gone")),
            SocketDriver::Http => {
                Err(WarrenError::internal("http connections cannot receive frames"))
            }
        }
    }

    /// Queue a raw, already-encoded frame.
    pub fn send_raw(&self, bytes: Bytes) -> Result<(), WarrenError> {
        match &self.driver {
            SocketDriver::WebSocket { tx } | SocketDriver::Sse { tx } => tx
                .send(SocketFrame::Message(bytes))
                .map_err(|_| WarrenError::internal("socket is gone")),
            SocketDriver::Http => {
                Err(WarrenError::internal("http connections cannot receive frames"))
            }
        }
    }

    /// Request a close. The frame drains through the transport task; await
    /// [`Self::wait_closed`] to observe the peer actually going away.
    pub fn disconnect(&self, reason: Option<&str>) {
        let frame = SocketFrame::Close {
            code: CLOSE_NORMAL,
            reason: reason.unwrap_or_default().to_owned(),
        };
        match &self.driver {
            SocketDriver::WebSocket { tx } | SocketDriver::Sse { tx } => {
                let _ = tx.send(frame);
            }
            SocketDriver::Http => self.closed.mark_closed(),
        }
    }

    pub async fn wait_closed(&self) {
        self.closed.wait().await;
    }

    pub fn ready_state(&self) -> ReadyState {
        match &self.driver {
            SocketDriver::WebSocket { tx } | SocketDriver::Sse { tx } => {
                if self.closed.is_closed() || tx.is_closed() {
                    ReadyState::Closed
                } else {
                    ReadyState::Open
                }
            }
            SocketDriver::Http => {
                if self.closed.is_closed() {
                    ReadyState::Closed
                } else {
                    ReadyState::Open
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "socket_tests.rs"]
mod tests;
