// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end test harness: spins up a real runner server plus a manager
//! gateway (inline or proxy) in-process and exercises them over HTTP,
//! WebSocket, and SSE.

use std::sync::{Arc, Once};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use warren::definition::{ActorDefinition, ActorOptions, Registry};
use warren::driver::MemoryStorage;
use warren::protocol::{Encoding, HttpActionRequest, ToClient, ToServer, Value};
use warren::transport::handshake::build_protocols;
use warren::transport::headers;
use warren::{Runner, RunnerConfig};
use warrenmgr::transport::{ManagerState, Routing};
use warrenmgr::MemoryManagerDriver;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn int(n: i64) -> Value {
    Value::Integer(n.into())
}

#[allow(clippy::panic)]
pub fn as_int(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => i128::from(*i) as i64,
        other => panic!("not an integer: {other:?}"),
    }
}

/// The actor definitions every scenario runs against.
pub fn demo_registry() -> Registry {
    Registry::new()
        .define(counter_actor("counter", ActorOptions::default()))
        .define(counter_actor(
            "napper",
            ActorOptions { sleep_timeout: Duration::from_millis(300), ..ActorOptions::default() },
        ))
        .define(
            ActorDefinition::new("slowpoke")
                .options(ActorOptions {
                    action_timeout: Duration::from_millis(50),
                    ..ActorOptions::default()
                })
                .action("sleepy", |_ctx, _args| async {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(Value::Null)
                })
                .action("quick", |_ctx, _args| async { Ok(Value::Text("ok".to_owned())) }),
        )
        .define(
            ActorDefinition::new("recorder")
                .create_state(|_ctx| async { Ok(Value::Array(Vec::new())) })
                .action("scheduleRecord", |ctx, args| async move {
                    let Value::Array(items) = &args else {
                        return Err(warren::WarrenError::malformed("expected [label, delay_ms]"));
                    };
                    let label = items.first().cloned().unwrap_or(Value::Null);
                    let delay = items.get(1).map(as_int).unwrap_or(0);
                    ctx.schedule_after(
                        Duration::from_millis(delay.max(0) as u64),
                        "record",
                        Value::Array(vec![label]),
                    )
                    .await?;
                    Ok(Value::Null)
                })
                .action("record", |ctx, args| async move {
                    let label = match &args {
                        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                        other => other.clone(),
                    };
                    ctx.update_state(move |state| {
                        if let Value::Array(items) = state {
                            items.push(label);
                        }
                    })
                    .await?;
                    Ok(Value::Null)
                })
                .action("history", |ctx, _args| async move { Ok(ctx.state().await) }),
        )
}

fn counter_actor(name: &str, options: ActorOptions) -> ActorDefinition {
    ActorDefinition::new(name)
        .options(options)
        .create_state(|_ctx| async { Ok(int(0)) })
        .create_conn_state(|_ctx, _params| async { Ok(int(0)) })
        .action("increment", |ctx, args| async move {
            let by = first_int(&args).unwrap_or(1);
            let next = ctx
                .update_state(move |state| {
                    let next = as_int(state) + by;
                    *state = int(next);
                    next
                })
                .await?;
            ctx.broadcast("newCount", Value::Array(vec![int(next)])).await;
            Ok(int(next))
        })
        .action("setCount", |ctx, args| async move {
            let value = first_int(&args).unwrap_or(0);
            ctx.update_state(move |state| *state = int(value)).await?;
            ctx.broadcast("newCount", Value::Array(vec![int(value)])).await;
            Ok(int(value))
        })
        .action("getCount", |ctx, _args| async move { Ok(ctx.state().await) })
        .action("connIncrement", |ctx, args| async move {
            let by = first_int(&args).unwrap_or(1);
            let current = ctx.conn_state().await.map(|v| as_int(&v)).unwrap_or(0);
            let next = current + by;
            ctx.set_conn_state(int(next)).await?;
            Ok(int(next))
        })
        .action("connGet", |ctx, _args| async move {
            Ok(ctx.conn_state().await.unwrap_or(Value::Null))
        })
}

fn first_int(args: &Value) -> Option<i64> {
    match args {
        Value::Array(items) => items.first().map(as_int),
        _ => None,
    }
}

/// One running topology: a runner server plus a manager gateway.
pub struct TestApp {
    pub manager_url: String,
    pub runner_url: String,
    pub storage: Arc<MemoryStorage>,
    pub runner: Arc<Runner>,
    pub shutdown: CancellationToken,
    client: reqwest::Client,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Spawn runner + manager in one process. `proxy` decides whether the
/// manager routes inline or over real HTTP/WS to the runner server.
pub async fn spawn_app(proxy: bool) -> anyhow::Result<TestApp> {
    ensure_crypto();

    let storage = Arc::new(MemoryStorage::new());
    let shutdown = CancellationToken::new();
    let runner = Runner::new(demo_registry(), storage.clone(), shutdown.clone());

    let runner_addr = warren::transport::spawn_server(
        &RunnerConfig::default(),
        Arc::clone(&runner),
        shutdown.clone(),
    )
    .await?;
    let runner_url = format!("http://{runner_addr}");

    let routing = if proxy {
        Routing::Proxy { target: warrenmgr::proxy::ProxyTarget::new(runner_url.clone()) }
    } else {
        Routing::Inline { runner: Arc::clone(&runner) }
    };
    let state = Arc::new(ManagerState {
        driver: Arc::new(MemoryManagerDriver::new(storage.clone())),
        routing,
        auth_token: None,
        serverless: false,
        cloudflare_compat: false,
        client_endpoint: None,
        actor_names: runner.registry().names(),
    });
    let manager_addr =
        warrenmgr::spawn_server("127.0.0.1", 0, state, shutdown.clone()).await?;

    Ok(TestApp {
        manager_url: format!("http://{manager_addr}"),
        runner_url,
        storage,
        runner,
        shutdown,
        client: reqwest::Client::new(),
    })
}

impl TestApp {
    /// `PUT /actors` get-or-create; returns `(actor_id, created)`.
    pub async fn get_or_create(
        &self,
        name: &str,
        key: &[&str],
    ) -> anyhow::Result<(Uuid, bool)> {
        let body = serde_json::json!({"name": name, "key": key});
        let resp: serde_json::Value = self
            .client
            .put(format!("{}/actors", self.manager_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let id = resp["actor"]["actor_id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("no actor id in response"))?;
        Ok((Uuid::parse_str(id)?, resp["created"].as_bool().unwrap_or(false)))
    }

    /// One-shot action through the gateway, `getOrCreateForKey` query.
    pub async fn action(
        &self,
        name: &str,
        key: &[&str],
        action: &str,
        args: Value,
    ) -> anyhow::Result<Result<Value, (u16, serde_json::Value)>> {
        let query = serde_json::json!({"getOrCreateForKey": {"name": name, "key": key}});
        let body = Encoding::Json.encode_http_request(&HttpActionRequest { args })?;
        let resp = self
            .client
            .post(format!("{}/actors/action/{action}", self.manager_url))
            .header(headers::ACTOR_QUERY, query.to_string())
            .header(headers::ENCODING, "json")
            .body(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await?;
        if status == 200 {
            let decoded = Encoding::Json.decode_http_response(&bytes)?;
            Ok(Ok(decoded.output))
        } else {
            let err: serde_json::Value = serde_json::from_slice(&bytes)?;
            Ok(Err((status, err)))
        }
    }
}

/// A WebSocket client connection through the gateway.
pub struct WsClient {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    encoding: Encoding,
    next_action_id: u64,
    pub actor_id: String,
    pub conn_id: Uuid,
    pub conn_token: String,
}

impl WsClient {
    /// Open a connection to `actor_id`, optionally reconnecting with prior
    /// credentials. Consumes and returns the leading `Init` frame fields.
    pub async fn connect(
        app: &TestApp,
        actor_id: Uuid,
        encoding: Encoding,
        reconnect: Option<(Uuid, String)>,
    ) -> anyhow::Result<Self> {
        let url = format!("{}/actors/connect/websocket", app.manager_url.replace("http", "ws"));
        let mut request = url.into_client_request()?;
        let protocols =
            build_protocols(Some("actor"), Some(actor_id), encoding, None, reconnect.as_ref());
        request
            .headers_mut()
            .insert("sec-websocket-protocol", protocols.parse()?);
        let (stream, _resp) = tokio_tungstenite::connect_async(request).await?;

        let mut client = Self {
            stream,
            encoding,
            next_action_id: 1,
            actor_id: String::new(),
            conn_id: Uuid::nil(),
            conn_token: String::new(),
        };
        match client.next_frame().await? {
            ToClient::Init { actor_id, connection_id, connection_token } => {
                client.actor_id = actor_id;
                client.conn_id = connection_id;
                client.conn_token = connection_token;
                Ok(client)
            }
            other => anyhow::bail!("first frame was not Init: {other:?}"),
        }
    }

    /// Read the next protocol frame (skipping transport pings).
    pub async fn next_frame(&mut self) -> anyhow::Result<ToClient> {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for frame"))?
                .ok_or_else(|| anyhow::anyhow!("websocket closed"))??;
            match msg {
                WsMessage::Binary(bytes) => return Ok(self.encoding.decode_to_client(&bytes)?),
                WsMessage::Text(text) => {
                    return Ok(self.encoding.decode_to_client(text.as_bytes())?)
                }
                WsMessage::Close(frame) => {
                    anyhow::bail!("websocket closed: {frame:?}")
                }
                _ => continue,
            }
        }
    }

    /// True when no frame arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.stream.next()).await.is_err()
    }

    pub async fn send(&mut self, msg: &ToServer) -> anyhow::Result<()> {
        let bytes = self.encoding.encode_to_server(msg)?;
        let frame = if self.encoding.is_binary() {
            WsMessage::Binary(bytes.into())
        } else {
            WsMessage::Text(String::from_utf8_lossy(&bytes).into_owned().into())
        };
        self.stream.send(frame).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, event: &str, subscribe: bool) -> anyhow::Result<()> {
        self.send(&ToServer::SubscriptionRequest {
            event_name: event.to_owned(),
            subscribe,
        })
        .await
    }

    /// Invoke an action and wait for its response (other frames are
    /// surfaced as errors to keep scenario plumbing honest).
    pub async fn action(&mut self, name: &str, args: Value) -> anyhow::Result<Value> {
        let id = self.next_action_id;
        self.next_action_id += 1;
        self.send(&ToServer::ActionRequest { id, name: name.to_owned(), args }).await?;
        match self.next_frame().await? {
            ToClient::ActionResponse { id: got, output } if got == id => Ok(output),
            other => anyhow::bail!("expected ActionResponse({id}), got {other:?}"),
        }
    }

    /// Drop the TCP stream without a close frame (non-clean close).
    pub fn abort(self) {
        drop(self.stream);
    }

    /// Close cleanly (code 1000).
    pub async fn close(mut self) -> anyhow::Result<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}
