// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios exercising the full gateway → runner → actor
//! path over real sockets.

use std::time::Duration;

use serial_test::serial;
use uuid::Uuid;

use warren::protocol::{Encoding, ToClient, Value};
use warren_specs::{as_int, int, spawn_app, WsClient};

const LIVENESS_POLL: Duration = Duration::from_millis(25);

async fn wait_until<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() > end {
            return false;
        }
        tokio::time::sleep(LIVENESS_POLL).await;
    }
}

// -- Scenario 1: counter create / increment / reload --------------------------

#[tokio::test]
#[serial]
async fn counter_survives_reload() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;

    let out = app.action("napper", &["k1"], "increment", Value::Array(vec![int(5)])).await?;
    assert_eq!(as_int(&out.unwrap()), 5);

    // The napper's idle timer unloads it — the same effect as a driver
    // restart: in-memory state is gone, the blob survives.
    let unloaded =
        wait_until(Duration::from_secs(5), || async { app.runner.running_count().await == 0 })
            .await;
    assert!(unloaded, "actor never went to sleep");

    let out = app.action("napper", &["k1"], "getCount", Value::Null).await?;
    assert_eq!(as_int(&out.unwrap()), 5);
    Ok(())
}

// -- Scenario 2: event subscription -------------------------------------------

#[tokio::test]
async fn events_reach_subscribers_exactly_once() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;
    let (actor_id, _) = app.get_or_create("counter", &["k2"]).await?;

    let mut a = WsClient::connect(&app, actor_id, Encoding::Json, None).await?;
    a.subscribe("newCount", true).await?;
    // Subscription requests have no acknowledgement; give the server a
    // beat to process before triggering the broadcast.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut b = WsClient::connect(&app, actor_id, Encoding::Json, None).await?;
    let out = b.action("setCount", Value::Array(vec![int(7)])).await?;
    assert_eq!(as_int(&out), 7);

    let ToClient::Event { name, args } = a.next_frame().await? else {
        anyhow::bail!("expected event frame");
    };
    assert_eq!(name, "newCount");
    assert_eq!(args, Value::Array(vec![int(7)]));

    // Unsubscribe; the next broadcast must not reach A.
    a.subscribe("newCount", false).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.action("setCount", Value::Array(vec![int(9)])).await?;
    assert!(a.expect_silence(Duration::from_millis(300)).await, "event after unsubscribe");
    Ok(())
}

// -- Scenario 3: reconnection preserves conn state ----------------------------

#[tokio::test]
async fn reconnect_preserves_connection_state() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;
    let (actor_id, _) = app.get_or_create("counter", &["k3"]).await?;

    let mut client = WsClient::connect(&app, actor_id, Encoding::Json, None).await?;
    let out = client.action("connIncrement", Value::Array(vec![int(3)])).await?;
    assert_eq!(as_int(&out), 3);
    let (conn_id, token) = (client.conn_id, client.conn_token.clone());

    // Force-close without a close frame, then reconnect inside the
    // liveness window with the same credentials.
    client.abort();
    let mut revived =
        WsClient::connect(&app, actor_id, Encoding::Json, Some((conn_id, token.clone()))).await?;
    assert_eq!(revived.conn_id, conn_id, "Init must carry the original connection id");
    assert_eq!(revived.conn_token, token);

    let out = revived.action("connGet", Value::Null).await?;
    assert_eq!(as_int(&out), 3, "connection state must survive the reconnect");
    Ok(())
}

// -- Scenario 4: scheduled event ordering -------------------------------------

#[tokio::test]
#[serial]
async fn scheduled_events_fire_in_order() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;
    let key = ["sched"];

    for (label, delay) in [("first", 250), ("second", 750), ("third", 1250)] {
        app.action(
            "recorder",
            &key,
            "scheduleRecord",
            Value::Array(vec![Value::Text(label.to_owned()), int(delay)]),
        )
        .await?
        .map_err(|e| anyhow::anyhow!("schedule failed: {e:?}"))?;
    }

    let labels = |value: &Value| -> Vec<String> {
        match value {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Text(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    };

    // t ≈ 500ms / 1000ms / 1500ms.
    let mut observed = Vec::new();
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let history = app
            .action("recorder", &key, "history", Value::Null)
            .await?
            .map_err(|e| anyhow::anyhow!("history failed: {e:?}"))?;
        observed.push(labels(&history));
    }
    assert_eq!(observed[0], ["first"]);
    assert_eq!(observed[1], ["first", "second"]);
    assert_eq!(observed[2], ["first", "second", "third"]);
    Ok(())
}

// -- Scenario 5: action timeout -----------------------------------------------

#[tokio::test]
async fn slow_action_times_out() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;

    let result = app.action("slowpoke", &["t"], "sleepy", Value::Null).await?;
    let (status, body) = result.expect_err("slow action must fail");
    assert_eq!(status, 400);
    assert_eq!(body["group"], "action");
    assert_eq!(body["code"], "timed_out");

    let result = app.action("slowpoke", &["t"], "quick", Value::Null).await?;
    assert_eq!(result.unwrap(), Value::Text("ok".to_owned()));
    Ok(())
}

// -- Scenario 6: sleep and wake -----------------------------------------------

#[tokio::test]
#[serial]
async fn sleep_then_wake_preserves_state() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;

    app.action("napper", &["nap"], "increment", Value::Array(vec![int(2)])).await?.unwrap();
    let slept =
        wait_until(Duration::from_secs(5), || async { app.runner.running_count().await == 0 })
            .await;
    assert!(slept, "actor with no connections must sleep after its timeout");

    // Any subsequent action wakes the actor and observes prior state.
    let out = app.action("napper", &["nap"], "getCount", Value::Null).await?;
    assert_eq!(as_int(&out.unwrap()), 2);
    assert_eq!(app.runner.running_count().await, 1);
    Ok(())
}

// -- Cross-encoding and proxy paths -------------------------------------------

#[tokio::test]
async fn binary_encodings_work_end_to_end() -> anyhow::Result<()> {
    let app = spawn_app(false).await?;
    let (actor_id, _) = app.get_or_create("counter", &["enc"]).await?;

    for encoding in [Encoding::Cbor, Encoding::Bare] {
        let mut client = WsClient::connect(&app, actor_id, encoding, None).await?;
        let out = client.action("increment", Value::Array(vec![int(10)])).await?;
        assert!(as_int(&out) >= 10, "{encoding:?}");
        client.close().await?;
    }
    Ok(())
}

#[tokio::test]
async fn proxy_mode_routes_actions_and_streams() -> anyhow::Result<()> {
    let app = spawn_app(true).await?;

    let out = app.action("counter", &["proxied"], "increment", Value::Array(vec![int(6)])).await?;
    assert_eq!(as_int(&out.unwrap()), 6);

    // WebSocket through the proxy: Init, action, event fan-out.
    let (actor_id, created) = app.get_or_create("counter", &["proxied"]).await?;
    assert!(!created, "the action above already created it");

    let mut client = WsClient::connect(&app, actor_id, Encoding::Json, None).await?;
    client.subscribe("newCount", true).await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let out = app.action("counter", &["proxied"], "increment", Value::Array(vec![int(1)])).await?;
    assert_eq!(as_int(&out.unwrap()), 7);

    let ToClient::Event { name, args } = client.next_frame().await? else {
        anyhow::bail!("expected event frame over the proxied socket");
    };
    assert_eq!(name, "newCount");
    assert_eq!(args, Value::Array(vec![int(7)]));
    Ok(())
}

#[tokio::test]
async fn websocket_setup_errors_arrive_in_stream() -> anyhow::Result<()> {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let app = spawn_app(false).await?;
    let bogus = Uuid::new_v4();
    let url = format!("{}/actors/connect/websocket", app.manager_url.replace("http", "ws"));
    let mut request = url.into_client_request()?;
    let protocols = warren::transport::handshake::build_protocols(
        Some("actor"),
        Some(bogus),
        Encoding::Json,
        None,
        None,
    );
    request.headers_mut().insert("sec-websocket-protocol", protocols.parse()?);

    let (mut stream, _) = tokio_tungstenite::connect_async(request).await?;
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await?
        .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
    let bytes = match first {
        tokio_tungstenite::tungstenite::Message::Text(t) => t.as_bytes().to_vec(),
        tokio_tungstenite::tungstenite::Message::Binary(b) => b.to_vec(),
        other => anyhow::bail!("unexpected first frame: {other:?}"),
    };
    let ToClient::Error { group, code, .. } = Encoding::Json.decode_to_client(&bytes)? else {
        anyhow::bail!("first frame must be an Error");
    };
    assert_eq!(group, "actor");
    assert_eq!(code, "not_found");

    // Then a 1011 close with the code in the reason.
    let next = tokio::time::timeout(Duration::from_secs(5), stream.next()).await?;
    match next {
        Some(Ok(tokio_tungstenite::tungstenite::Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 1011);
            assert_eq!(frame.reason.as_str(), "actor/not_found");
        }
        other => anyhow::bail!("expected close frame, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn sse_delivers_init_and_events() -> anyhow::Result<()> {
    use futures_util::StreamExt;

    let app = spawn_app(false).await?;
    let (actor_id, _) = app.get_or_create("counter", &["sse"]).await?;
    let query = serde_json::json!({"getForId": {"name": "counter", "actorId": actor_id}});

    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/actors/connect/sse", app.manager_url))
        .header(warren::transport::headers::ACTOR_QUERY, query.to_string())
        .header(warren::transport::headers::ENCODING, "json")
        .send()
        .await?;
    assert!(response.status().is_success());

    let mut body = response.bytes_stream();
    let mut buffer = String::new();

    // Pull SSE `data:` payloads as they arrive.
    let next_data = |buffer: &mut String| -> Option<String> {
        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_owned();
            buffer.drain(..=pos);
            if let Some(data) = line.strip_prefix("data: ") {
                if data != "ping" {
                    return Some(data.to_owned());
                }
            }
        }
        None
    };

    let mut frames: Vec<ToClient> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while frames.is_empty() {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no Init over SSE");
        if let Some(chunk) =
            tokio::time::timeout_at(deadline, body.next()).await.ok().flatten()
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk?));
            while let Some(data) = next_data(&mut buffer) {
                frames.push(Encoding::Json.decode_to_client(data.as_bytes())?);
            }
        }
    }
    let ToClient::Init { connection_id, connection_token, .. } = &frames[0] else {
        anyhow::bail!("first SSE frame must be Init");
    };
    let (conn_id, token) = (*connection_id, connection_token.clone());

    // Subscribe over the message-injection endpoint, then trigger a
    // broadcast and expect the event on the stream.
    let subscribe = Encoding::Json
        .encode_to_server(&warren::protocol::ToServer::SubscriptionRequest {
            event_name: "newCount".to_owned(),
            subscribe: true,
        })?;
    let response = client
        .post(format!("{}/actors/message", app.manager_url))
        .header(warren::transport::headers::ACTOR_QUERY, query.to_string())
        .header(warren::transport::headers::ENCODING, "json")
        .header(warren::transport::headers::CONN, conn_id.to_string())
        .header(warren::transport::headers::CONN_TOKEN, token)
        .body(subscribe)
        .send()
        .await?;
    anyhow::ensure!(response.status().is_success(), "subscribe failed: {}", response.status());

    app.action("counter", &["sse"], "setCount", Value::Array(vec![int(42)])).await?.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(ToClient::Event { name, args }) = frames.iter().find_map(|f| match f {
            ToClient::Event { name, args } => {
                Some(ToClient::Event { name: name.clone(), args: args.clone() })
            }
            _ => None,
        }) {
            assert_eq!(name, "newCount");
            assert_eq!(args, Value::Array(vec![int(42)]));
            return Ok(());
        }
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no event over SSE");
        if let Some(chunk) =
            tokio::time::timeout_at(deadline, body.next()).await.ok().flatten()
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk?));
            while let Some(data) = next_data(&mut buffer) {
                frames.push(Encoding::Json.decode_to_client(data.as_bytes())?);
            }
        }
    }
}
