// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use crate::error::ErrorCode;
use crate::protocol::Value;

use super::{value_from_json, value_to_json};

fn roundtrip(value: Value) -> Value {
    let encoded = value_to_json(&value).unwrap();
    value_from_json(&encoded).unwrap()
}

#[test]
fn primitives_pass_through() {
    for value in [
        Value::Null,
        Value::Bool(true),
        Value::Integer(42.into()),
        Value::Integer((-7i64).into()),
        Value::Float(1.5),
        Value::Text("hello".to_owned()),
    ] {
        assert_eq!(roundtrip(value.clone()), value);
    }
}

#[test]
fn bytes_escape_as_base64() {
    let value = Value::Bytes(vec![0, 1, 2, 255]);
    let encoded = value_to_json(&value).unwrap();
    assert_eq!(encoded, json!(["$bytes", "AAEC/w=="]));
    assert_eq!(value_from_json(&encoded).unwrap(), value);
}

#[test]
fn big_integers_escape_as_decimal_strings() {
    let big = i128::from(u64::MAX) + 1;
    let value = Value::Integer(ciborium::value::Integer::try_from(big).unwrap());
    let encoded = value_to_json(&value).unwrap();
    assert_eq!(encoded, json!(["$bigint", big.to_string()]));
    assert_eq!(value_from_json(&encoded).unwrap(), value);
}

#[test]
fn bignum_tags_survive_with_sign() {
    let positive = Value::Tag(2, Box::new(Value::Bytes(vec![1, 2, 3])));
    let negative = Value::Tag(3, Box::new(Value::Bytes(vec![9, 9])));
    assert_eq!(roundtrip(positive.clone()), positive);
    assert_eq!(roundtrip(negative.clone()), negative);
}

#[test]
fn other_tags_escape_generically() {
    let value = Value::Tag(1, Box::new(Value::Integer(1700000000.into())));
    let encoded = value_to_json(&value).unwrap();
    assert_eq!(encoded, json!(["$tag", 1, 1700000000]));
    assert_eq!(value_from_json(&encoded).unwrap(), value);
}

#[test]
fn dollar_prefixed_user_array_is_double_escaped() {
    let value = Value::Array(vec![
        Value::Text("$weird".to_owned()),
        Value::Integer(1.into()),
    ]);
    let encoded = value_to_json(&value).unwrap();
    assert_eq!(encoded, json!(["$array", ["$weird", 1]]));
    assert_eq!(value_from_json(&encoded).unwrap(), value);
}

#[test]
fn plain_arrays_are_untouched() {
    let value = Value::Array(vec![Value::Text("plain".to_owned()), Value::Integer(1.into())]);
    let encoded = value_to_json(&value).unwrap();
    assert_eq!(encoded, json!(["plain", 1]));
}

#[test]
fn unknown_escape_tag_is_malformed() {
    let err = value_from_json(&json!(["$mystery", 1])).unwrap_err();
    assert_eq!(err.code, ErrorCode::MessageMalformed);
}

#[test]
fn non_string_map_key_is_rejected() {
    let value = Value::Map(vec![(Value::Integer(1.into()), Value::Bool(true))]);
    assert!(value_to_json(&value).is_err());
}

#[test]
fn nested_structures_round_trip() {
    let value = Value::Map(vec![
        (
            Value::Text("items".to_owned()),
            Value::Array(vec![
                Value::Bytes(vec![7, 8]),
                Value::Array(vec![Value::Text("$nested".to_owned())]),
            ]),
        ),
        (Value::Text("count".to_owned()), Value::Integer(3.into())),
    ]);
    assert_eq!(roundtrip(value.clone()), value);
}
