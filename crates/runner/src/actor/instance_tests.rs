// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::actor::socket::{CloseSignal, ConnSocket, SocketFrame};
use crate::definition::{ActorDefinition, ActorOptions};
use crate::driver::{MemoryStorage, StorageDriver};
use crate::error::{ErrorCode, WarrenError};
use crate::persist::epoch_ms;
use crate::protocol::{Encoding, ToClient, ToServer, Value};

use super::ActorInstance;

fn int(n: i64) -> Value {
    Value::Integer(n.into())
}

fn as_int(value: &Value) -> i64 {
    match value {
        Value::Integer(i) => i128::from(*i) as i64,
        other => panic!("not an integer: {other:?}"),
    }
}

/// A counter definition: state is a bare integer.
fn counter_definition() -> ActorDefinition {
    ActorDefinition::new("counter")
        .create_state(|_ctx| async { Ok(int(0)) })
        .action("increment", |ctx, args| async move {
            let by = match &args {
                Value::Array(items) if !items.is_empty() => as_int(&items[0]),
                _ => 1,
            };
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
        .action("getCount", |ctx, _args| async move { Ok(ctx.state().await) })
}

async fn start_instance(
    definition: ActorDefinition,
    storage: Arc<MemoryStorage>,
    actor_id: Uuid,
) -> Arc<ActorInstance> {
    let (unload_tx, _unload_rx) = mpsc::unbounded_channel();
    let instance = ActorInstance::new(
        actor_id,
        definition.name.clone(),
        vec!["k1".to_owned()],
        Arc::new(definition),
        ActorOptions::default(),
        storage,
        unload_tx,
    );
    instance.start(None).await.unwrap();
    instance
}

fn ws_socket() -> (ConnSocket, mpsc::UnboundedReceiver<SocketFrame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnSocket::websocket(tx, Arc::new(CloseSignal::default())), rx)
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<SocketFrame>) -> ToClient {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("socket channel closed");
    let SocketFrame::Message(bytes) = frame else { panic!("expected message frame") };
    Encoding::Json.decode_to_client(&bytes).unwrap()
}

#[tokio::test]
async fn action_increments_and_state_survives_reload() {
    let storage = Arc::new(MemoryStorage::new());
    let actor_id = Uuid::new_v4();

    let instance = start_instance(counter_definition(), Arc::clone(&storage), actor_id).await;
    let out = instance
        .handle_action("increment", Value::Array(vec![int(5)]), Value::Null)
        .await
        .unwrap();
    assert_eq!(as_int(&out), 5);
    instance.stop().await;

    // Simulate a driver restart: a new instance loads the same blob.
    let reloaded = start_instance(counter_definition(), storage, actor_id).await;
    let out = reloaded.handle_action("getCount", Value::Null, Value::Null).await.unwrap();
    assert_eq!(as_int(&out), 5);
}

#[tokio::test]
async fn unknown_action_is_not_found() {
    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(counter_definition(), storage, Uuid::new_v4()).await;
    let err = instance.handle_action("nope", Value::Null, Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ActionNotFound);
}

#[tokio::test]
async fn slow_action_times_out_fast_action_succeeds() {
    let options =
        ActorOptions { action_timeout: Duration::from_millis(50), ..ActorOptions::default() };
    let definition = ActorDefinition::new("slowpoke")
        .options(options)
        .action("slow", |_ctx, _args| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Value::Null)
        })
        .action("fast", |_ctx, _args| async { Ok(Value::Text("ok".to_owned())) });

    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let err = instance.handle_action("slow", Value::Null, Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ActionTimedOut);

    let out = instance.handle_action("fast", Value::Null, Value::Null).await.unwrap();
    assert_eq!(out, Value::Text("ok".to_owned()));
}

#[tokio::test]
async fn subscribed_connection_gets_event_exactly_once() {
    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(counter_definition(), storage, Uuid::new_v4()).await;

    // Connection A subscribes; connection B triggers the broadcast.
    let (socket_a, mut rx_a) = ws_socket();
    let conn_a = instance
        .create_conn(socket_a, Encoding::Json, Value::Null, None)
        .await
        .unwrap();
    assert!(matches!(next_message(&mut rx_a).await, ToClient::Init { .. }));

    let (socket_b, mut rx_b) = ws_socket();
    let conn_b = instance
        .create_conn(socket_b, Encoding::Json, Value::Null, None)
        .await
        .unwrap();
    assert!(matches!(next_message(&mut rx_b).await, ToClient::Init { .. }));

    instance
        .process_message(
            conn_a,
            ToServer::SubscriptionRequest { event_name: "newCount".to_owned(), subscribe: true },
        )
        .await
        .unwrap();

    instance
        .process_message(
            conn_b,
            ToServer::ActionRequest {
                id: 1,
                name: "increment".to_owned(),
                args: Value::Array(vec![int(7)]),
            },
        )
        .await
        .unwrap();

    // A sees exactly one event.
    let ToClient::Event { name, args } = next_message(&mut rx_a).await else {
        panic!("expected event");
    };
    assert_eq!(name, "newCount");
    assert_eq!(args, Value::Array(vec![int(7)]));

    // B gets its action response but no event (not subscribed).
    let ToClient::ActionResponse { id, output } = next_message(&mut rx_b).await else {
        panic!("expected action response");
    };
    assert_eq!(id, 1);
    assert_eq!(as_int(&output), 7);

    // Unsubscribe: the next broadcast skips A.
    instance
        .process_message(
            conn_a,
            ToServer::SubscriptionRequest { event_name: "newCount".to_owned(), subscribe: false },
        )
        .await
        .unwrap();
    instance
        .process_message(
            conn_b,
            ToServer::ActionRequest {
                id: 2,
                name: "increment".to_owned(),
                args: Value::Array(vec![int(2)]),
            },
        )
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx_a.recv()).await.is_err(),
        "unsubscribed connection must not receive events"
    );
}

#[tokio::test]
async fn scheduled_events_fire_in_timestamp_order() {
    let history: Arc<parking_lot::Mutex<Vec<String>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&history);
    let definition = ActorDefinition::new("recorder").action("record", move |_ctx, args| {
        let sink = Arc::clone(&sink);
        async move {
            if let Value::Array(items) = &args {
                if let Some(Value::Text(label)) = items.first() {
                    sink.lock().push(label.clone());
                }
            }
            Ok(Value::Null)
        }
    });

    let storage = Arc::new(MemoryStorage::new());
    let mut alarms = storage.take_alarm_stream().unwrap();
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let base = epoch_ms();
    // Schedule out of order; dispatch must be by timestamp.
    instance
        .schedule_event(base + 120, "record", Value::Array(vec![Value::Text("second".into())]))
        .await
        .unwrap();
    instance
        .schedule_event(base + 40, "record", Value::Array(vec![Value::Text("first".into())]))
        .await
        .unwrap();
    instance
        .schedule_event(base + 200, "record", Value::Array(vec![Value::Text("third".into())]))
        .await
        .unwrap();

    // Drive the alarm loop manually (the runner owns this in production).
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while history.lock().len() < 3 {
        let fired = tokio::time::timeout_at(deadline, alarms.recv()).await;
        match fired {
            Ok(Some(_)) => instance.on_alarm().await.unwrap(),
            _ => break,
        }
    }
    assert_eq!(*history.lock(), ["first", "second", "third"]);
}

#[tokio::test]
async fn alarm_with_nothing_due_is_a_noop() {
    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(counter_definition(), storage, Uuid::new_v4()).await;
    // No scheduled events at all.
    instance.on_alarm().await.unwrap();
}

#[tokio::test]
async fn scheduled_event_error_does_not_block_later_events() {
    let history: Arc<parking_lot::Mutex<Vec<String>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&history);
    let definition = ActorDefinition::new("mixed")
        .action("boom", |_ctx, _args| async {
            Err::<Value, _>(WarrenError::internal("scheduled failure"))
        })
        .action("record", move |_ctx, _args| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push("ran".to_owned());
                Ok(Value::Null)
            }
        });

    let storage = Arc::new(MemoryStorage::new());
    let mut alarms = storage.take_alarm_stream().unwrap();
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let base = epoch_ms();
    instance.schedule_event(base + 20, "boom", Value::Null).await.unwrap();
    instance.schedule_event(base + 30, "record", Value::Null).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while history.lock().is_empty() {
        match tokio::time::timeout_at(deadline, alarms.recv()).await {
            Ok(Some(_)) => instance.on_alarm().await.unwrap(),
            _ => break,
        }
    }
    assert_eq!(*history.lock(), ["ran"]);
}

#[tokio::test]
async fn invalid_state_mutation_fails_synchronously_and_keeps_snapshot() {
    let definition = ActorDefinition::new("strict")
        .create_state(|_ctx| async { Ok(int(1)) })
        .action("corrupt", |ctx, _args| async move {
            ctx.update_state(|state| {
                *state = Value::Map(vec![(Value::Integer(1.into()), Value::Null)]);
            })
            .await?;
            Ok(Value::Null)
        })
        .action("get", |ctx, _args| async move { Ok(ctx.state().await) });

    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let err = instance.handle_action("corrupt", Value::Null, Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::StateInvalidType);

    let out = instance.handle_action("get", Value::Null, Value::Null).await.unwrap();
    assert_eq!(as_int(&out), 1);
}

#[tokio::test]
async fn on_state_change_does_not_recurse() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let definition = ActorDefinition::new("reactive")
        .create_state(|_ctx| async { Ok(int(0)) })
        .on_state_change(move |ctx, _state| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                // A mutation inside the hook must not re-trigger it.
                let _ = ctx.update_state(|state| *state = int(99)).await;
            }
        })
        .action("bump", |ctx, _args| async move {
            ctx.update_state(|state| *state = int(1)).await?;
            Ok(Value::Null)
        });

    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;
    instance.handle_action("bump", Value::Null, Value::Null).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // The inner mutation still landed.
    let state = instance.state_snapshot().await;
    assert_eq!(as_int(&state), 99);
}

#[tokio::test]
async fn reconnect_preserves_conn_state() {
    let definition = counter_definition()
        .create_conn_state(|_ctx, _params| async { Ok(int(0)) })
        .action("conn_incr", |ctx, _args| async move {
            let current = ctx.conn_state().await.unwrap_or(Value::Null);
            let next = as_int(&current) + 3;
            ctx.set_conn_state(int(next)).await?;
            Ok(int(next))
        })
        .action("conn_get", |ctx, _args| async move {
            Ok(ctx.conn_state().await.unwrap_or(Value::Null))
        });

    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let (socket, mut rx) = ws_socket();
    let conn_id = instance
        .create_conn(socket, Encoding::Json, Value::Null, None)
        .await
        .unwrap();
    let ToClient::Init { connection_token, .. } = next_message(&mut rx).await else {
        panic!("expected init");
    };

    instance
        .process_message(
            conn_id,
            ToServer::ActionRequest { id: 1, name: "conn_incr".to_owned(), args: Value::Null },
        )
        .await
        .unwrap();
    let ToClient::ActionResponse { output, .. } = next_message(&mut rx).await else {
        panic!("expected response");
    };
    assert_eq!(as_int(&output), 3);

    // Force-close non-cleanly, then reconnect inside the liveness window.
    // The persisted half survives the socket loss.
    let persisted = instance.conns.snapshot().await;
    assert_eq!(persisted[0].conn_id, conn_id);
    drop(rx);

    let (socket2, mut rx2) = ws_socket();
    let rebound = instance
        .create_conn(
            socket2,
            Encoding::Json,
            Value::Null,
            Some((conn_id, connection_token.clone())),
        )
        .await
        .unwrap();
    assert_eq!(rebound, conn_id);
    let ToClient::Init { connection_id, connection_token: token2, .. } =
        next_message(&mut rx2).await
    else {
        panic!("expected init on reconnect");
    };
    assert_eq!(connection_id, conn_id);
    assert_eq!(token2, connection_token);

    instance
        .process_message(
            conn_id,
            ToServer::ActionRequest { id: 2, name: "conn_get".to_owned(), args: Value::Null },
        )
        .await
        .unwrap();
    let ToClient::ActionResponse { output, .. } = next_message(&mut rx2).await else {
        panic!("expected response");
    };
    assert_eq!(as_int(&output), 3, "conn state must survive the reconnect");
}

#[tokio::test]
async fn before_action_response_transforms_output() {
    let definition = ActorDefinition::new("wrapper")
        .create_state(|_ctx| async { Ok(Value::Null) })
        .on_before_action_response(|_ctx, name, output| async move {
            Ok(Value::Array(vec![Value::Text(name), output]))
        })
        .action("echo", |_ctx, args| async move { Ok(args) });

    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let out = instance
        .handle_action("echo", Value::Text("hi".to_owned()), Value::Null)
        .await
        .unwrap();
    assert_eq!(
        out,
        Value::Array(vec![Value::Text("echo".to_owned()), Value::Text("hi".to_owned())])
    );
}

#[tokio::test]
async fn stateless_actor_rejects_state_mutation() {
    let definition = ActorDefinition::new("stateless").action("touch", |ctx, _args| async move {
        ctx.update_state(|state| *state = int(1)).await?;
        Ok(Value::Null)
    });
    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(definition, storage, Uuid::new_v4()).await;

    let err = instance.handle_action("touch", Value::Null, Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ActorStateNotEnabled);
}

#[tokio::test]
async fn fetch_without_handler_is_not_defined() {
    let storage = Arc::new(MemoryStorage::new());
    let instance = start_instance(counter_definition(), storage, Uuid::new_v4()).await;
    let req = crate::definition::RawRequest {
        method: "GET".to_owned(),
        path: "/".to_owned(),
        headers: Vec::new(),
        body: bytes::Bytes::new(),
    };
    let err = instance.handle_fetch(req).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::FetchNotDefined);
}

#[tokio::test]
async fn stop_flushes_state_and_refuses_new_work() {
    let storage = Arc::new(MemoryStorage::new());
    let actor_id = Uuid::new_v4();
    let instance = start_instance(counter_definition(), Arc::clone(&storage), actor_id).await;
    instance.handle_action("increment", Value::Array(vec![int(2)]), Value::Null).await.unwrap();

    instance.stop().await;
    let err = instance.handle_action("getCount", Value::Null, Value::Null).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);

    // The final flush reached storage.
    let blob = storage.read_blob(actor_id).await.unwrap().unwrap();
    let persisted = crate::persist::decode_actor(&blob).unwrap();
    assert_eq!(as_int(&persisted.state), 2);
}
