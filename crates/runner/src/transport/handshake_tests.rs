// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use uuid::Uuid;

use crate::error::ErrorCode;
use crate::protocol::{Encoding, Value};

use super::{build_protocols, parse_protocols};

#[test]
fn parse_full_protocol_list() {
    let actor_id = Uuid::new_v4();
    let conn_id = Uuid::new_v4();
    let header = format!(
        "rivet, rivet_target.actor, rivet_actor.{actor_id}, rivet_encoding.cbor, \
         rivet_conn_params.%7B%22room%22%3A%22a%22%7D, rivet_conn.{conn_id}, rivet_conn_token.tok123"
    );
    let handshake = parse_protocols(&header).unwrap();
    assert_eq!(handshake.target.as_deref(), Some("actor"));
    assert_eq!(handshake.actor_id, Some(actor_id));
    assert_eq!(handshake.encoding, Encoding::Cbor);
    assert_eq!(
        handshake.params,
        Value::Map(vec![(Value::Text("room".to_owned()), Value::Text("a".to_owned()))])
    );
    assert_eq!(handshake.reconnect(), Some((conn_id, "tok123".to_owned())));
}

#[test]
fn missing_tags_default() {
    let handshake = parse_protocols("rivet").unwrap();
    assert_eq!(handshake.encoding, Encoding::Json);
    assert_eq!(handshake.params, Value::Null);
    assert!(handshake.reconnect().is_none());
    assert!(handshake.actor_id.is_none());
}

#[test]
fn bad_encoding_is_rejected() {
    let err = parse_protocols("rivet, rivet_encoding.xml").unwrap_err();
    assert_eq!(err.code, ErrorCode::EncodingInvalid);
}

#[test]
fn build_then_parse_round_trips() {
    let actor_id = Uuid::new_v4();
    let conn_id = Uuid::new_v4();
    let header = build_protocols(
        Some("actor"),
        Some(actor_id),
        Encoding::Bare,
        Some(r#"{"k":[1,2]}"#),
        Some(&(conn_id, "secret-token".to_owned())),
    );
    let handshake = parse_protocols(&header).unwrap();
    assert_eq!(handshake.actor_id, Some(actor_id));
    assert_eq!(handshake.encoding, Encoding::Bare);
    assert_eq!(handshake.reconnect(), Some((conn_id, "secret-token".to_owned())));
    assert_eq!(
        handshake.params,
        Value::Map(vec![(
            Value::Text("k".to_owned()),
            Value::Array(vec![Value::Integer(1.into()), Value::Integer(2.into())]),
        )])
    );
}

#[test]
fn tokens_stay_out_of_urls() {
    // The whole point of the protocol list: everything sensitive rides in
    // the header, so building one never touches a URL.
    let header = build_protocols(None, None, Encoding::Json, None, None);
    assert_eq!(header, "rivet, rivet_encoding.json");
}
