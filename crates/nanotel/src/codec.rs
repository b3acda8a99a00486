//! Value Codec - native values to and from the OTLP value union
//!
//! Application values are `serde_json::Value`s (object key order is insertion
//! order). Encoding is total: anything without an OTLP representation, i.e.
//! `null`, encodes to `None` and is dropped from arrays and maps rather than
//! materialized.
//!
//! Decoding comes in two layers:
//!
//! - [`decode`] over the typed [`Otlp`] view, exhaustive and infallible;
//! - [`decode_json`] over raw OTLP/JSON, which classifies each node before
//!   decoding it and fails with [`DecodeError`] on unknown shapes.

use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::error::DecodeError;
use crate::otlp::{AnyValue, ArrayValue, IntValue, KeyValue, KeyValueList};

/// Ordered attribute map used throughout the public API.
pub type Attributes = Map<String, Value>;

/// Encodes a native value. Returns `None` for values that are dropped.
pub fn encode(value: &Value) -> Option<AnyValue> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(AnyValue::String(s.clone())),
        Value::Bool(b) => Some(AnyValue::Bool(*b)),
        Value::Number(n) => Some(encode_number(n)),
        Value::Array(items) => Some(AnyValue::Array(ArrayValue {
            values: items.iter().filter_map(encode).collect(),
        })),
        Value::Object(map) => Some(AnyValue::KvList(KeyValueList {
            values: encode_key_values(map),
        })),
    }
}

fn encode_number(n: &Number) -> AnyValue {
    if let Some(i) = n.as_i64() {
        AnyValue::Int(IntValue::Number(i))
    } else if let Some(u) = n.as_u64() {
        // Beyond i64: keep full precision as a decimal string
        AnyValue::Int(IntValue::Decimal(u.to_string()))
    } else {
        AnyValue::Double(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// Encodes a map as an ordered `KeyValue` sequence, skipping absent values.
pub fn encode_key_values(map: &Attributes) -> Vec<KeyValue> {
    map.iter()
        .filter_map(|(key, value)| encode(value).map(|value| KeyValue::new(key.clone(), value)))
        .collect()
}

/// Encodes anything serde can represent as JSON.
pub fn encode_serializable<T: Serialize + ?Sized>(
    value: &T,
) -> Result<Option<AnyValue>, serde_json::Error> {
    serde_json::to_value(value).map(|v| encode(&v))
}

/// A typed OTLP node to decode.
///
/// The variant is fixed when the view is built, so [`decode`] never has to
/// probe for fields.
#[derive(Debug, Clone, Copy)]
pub enum Otlp<'a> {
    Value(&'a AnyValue),
    Pair(&'a KeyValue),
    Values(&'a [AnyValue]),
    Pairs(&'a [KeyValue]),
}

/// Decodes a typed OTLP node back into a native value.
///
/// `Pair` and `Pairs` decode to objects; duplicate keys keep the last value.
pub fn decode(node: Otlp<'_>) -> Value {
    match node {
        Otlp::Value(value) => decode_any_value(value),
        Otlp::Pair(kv) => {
            let mut map = Map::with_capacity(1);
            map.insert(kv.key.clone(), decode_any_value(&kv.value));
            Value::Object(map)
        }
        Otlp::Values(values) => Value::Array(values.iter().map(decode_any_value).collect()),
        Otlp::Pairs(pairs) => Value::Object(decode_pairs(pairs)),
    }
}

fn decode_pairs(pairs: &[KeyValue]) -> Attributes {
    let mut map = Map::with_capacity(pairs.len());
    for kv in pairs {
        map.insert(kv.key.clone(), decode_any_value(&kv.value));
    }
    map
}

fn decode_any_value(value: &AnyValue) -> Value {
    match value {
        AnyValue::String(s) => Value::String(s.clone()),
        AnyValue::Bool(b) => Value::Bool(*b),
        AnyValue::Int(IntValue::Number(i)) => Value::from(*i),
        AnyValue::Int(IntValue::Decimal(s)) => decode_decimal(s),
        AnyValue::Double(d) => Number::from_f64(*d).map_or(Value::Null, Value::Number),
        AnyValue::Array(array) => decode(Otlp::Values(&array.values)),
        AnyValue::KvList(list) => Value::Object(decode_pairs(&list.values)),
    }
}

fn decode_decimal(s: &str) -> Value {
    if let Ok(i) = s.parse::<i64>() {
        Value::from(i)
    } else if let Ok(u) = s.parse::<u64>() {
        Value::from(u)
    } else {
        Value::String(s.to_string())
    }
}

/// Decodes raw OTLP/JSON: an `AnyValue`, a `KeyValue`, or a sequence of either.
///
/// A sequence whose elements all carry a `key` field decodes to one merged
/// object (so an empty sequence decodes to `{}`); any other sequence decodes
/// element-wise.
pub fn decode_json(json: &Value) -> Result<Value, DecodeError> {
    match json {
        Value::Array(items) if items.iter().all(has_key) => {
            let pairs = items
                .iter()
                .map(parse_key_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(decode(Otlp::Pairs(&pairs)))
        }
        Value::Array(items) => items
            .iter()
            .map(decode_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(_) if has_key(json) => Ok(decode(Otlp::Pair(&parse_key_value(json)?))),
        Value::Object(_) => {
            let value: AnyValue = serde_json::from_value(json.clone())
                .map_err(|e| DecodeError::InvalidShape(e.to_string()))?;
            Ok(decode(Otlp::Value(&value)))
        }
        Value::Null => Err(DecodeError::Unsupported("null")),
        Value::Bool(_) => Err(DecodeError::Unsupported("bool")),
        Value::Number(_) => Err(DecodeError::Unsupported("number")),
        Value::String(_) => Err(DecodeError::Unsupported("string")),
    }
}

fn has_key(json: &Value) -> bool {
    json.get("key").is_some()
}

fn parse_key_value(json: &Value) -> Result<KeyValue, DecodeError> {
    serde_json::from_value(json.clone()).map_err(|e| DecodeError::InvalidShape(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_scalars() {
        assert_eq!(encode(&json!("hi")), Some(AnyValue::String("hi".into())));
        assert_eq!(encode(&json!(true)), Some(AnyValue::Bool(true)));
        assert_eq!(encode(&json!(-7)), Some(AnyValue::Int(IntValue::Number(-7))));
        assert_eq!(encode(&json!(1.5)), Some(AnyValue::Double(1.5)));
        assert_eq!(encode(&json!(2.0)), Some(AnyValue::Double(2.0)));
        assert_eq!(encode(&Value::Null), None);
    }

    #[test]
    fn test_encode_large_integer_as_decimal() {
        let big = u64::MAX;
        assert_eq!(
            encode(&json!(big)),
            Some(AnyValue::Int(IntValue::Decimal("18446744073709551615".into())))
        );
        assert_eq!(decode(Otlp::Value(&encode(&json!(big)).unwrap())), json!(big));
    }

    #[test]
    fn test_encode_drops_absent_entries() {
        let value = json!({"a": 1, "gone": null, "list": [1, null, "x"]});
        let encoded = encode(&value).unwrap();

        let AnyValue::KvList(list) = &encoded else {
            panic!("expected kvlist, got {encoded:?}");
        };
        let keys: Vec<_> = list.values.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, ["a", "list"]);
        assert_eq!(decode(Otlp::Value(&encoded)), json!({"a": 1, "list": [1, "x"]}));
    }

    #[test]
    fn test_key_order_preserved() {
        let mut attrs = Attributes::new();
        attrs.insert("zeta".into(), json!(1));
        attrs.insert("alpha".into(), json!(2));
        attrs.insert("mid".into(), json!(3));

        let keys: Vec<_> = encode_key_values(&attrs).into_iter().map(|kv| kv.key).collect();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_encode_serializable() {
        #[derive(Serialize)]
        struct Order {
            id: u32,
            note: Option<String>,
        }

        let encoded = encode_serializable(&Order { id: 9, note: None }).unwrap().unwrap();
        assert_eq!(
            encoded,
            AnyValue::KvList(KeyValueList {
                values: vec![KeyValue::new("id", AnyValue::Int(IntValue::Number(9)))],
            })
        );
    }

    #[test]
    fn test_decode_pairs_last_key_wins() {
        let pairs = vec![
            KeyValue::new("k", AnyValue::Int(IntValue::Number(1))),
            KeyValue::new("other", AnyValue::Bool(false)),
            KeyValue::new("k", AnyValue::Int(IntValue::Number(2))),
        ];
        assert_eq!(decode(Otlp::Pairs(&pairs)), json!({"k": 2, "other": false}));
    }

    #[test]
    fn test_decode_json_shapes() {
        assert_eq!(decode_json(&json!({"stringValue": "a"})).unwrap(), json!("a"));
        assert_eq!(decode_json(&json!({"intValue": "42"})).unwrap(), json!(42));
        assert_eq!(decode_json(&json!({"intValue": 42})).unwrap(), json!(42));
        assert_eq!(
            decode_json(&json!({"key": "k", "value": {"boolValue": true}})).unwrap(),
            json!({"k": true})
        );
        assert_eq!(
            decode_json(&json!([
                {"key": "a", "value": {"doubleValue": 0.5}},
                {"key": "b", "value": {"arrayValue": {"values": [{"intValue": 1}]}}}
            ]))
            .unwrap(),
            json!({"a": 0.5, "b": [1]})
        );
        assert_eq!(
            decode_json(&json!([{"stringValue": "x"}, {"boolValue": false}])).unwrap(),
            json!(["x", false])
        );
        assert_eq!(
            decode_json(&json!({"kvlistValue": {"values": []}})).unwrap(),
            json!({})
        );
        assert_eq!(decode_json(&json!([])).unwrap(), json!({}));
        assert_eq!(
            decode_json(&json!({"arrayValue": {"values": []}})).unwrap(),
            json!([])
        );
    }

    #[test]
    fn test_decode_json_rejects_unknown_shapes() {
        assert!(matches!(
            decode_json(&json!({"bytesValue": "AAEC"})),
            Err(DecodeError::InvalidShape(_))
        ));
        assert!(matches!(
            decode_json(&json!({"key": "k"})),
            Err(DecodeError::InvalidShape(_))
        ));
        assert_eq!(decode_json(&json!(3)), Err(DecodeError::Unsupported("number")));
        assert_eq!(
            decode_json(&json!([{"stringValue": "ok"}, null])),
            Err(DecodeError::Unsupported("null"))
        );
    }

    #[test]
    fn test_decode_json_unsigned_int_value() {
        assert_eq!(decode_json(&json!({"intValue": u64::MAX})), Ok(json!(u64::MAX)));
        assert_eq!(
            decode_json(&json!({"intValue": "18446744073709551615"})),
            Ok(json!(u64::MAX))
        );
    }

    #[test]
    fn test_decode_json_several_tags_picks_one() {
        assert_eq!(
            decode_json(&json!({"stringValue": "a", "boolValue": true})),
            Ok(json!("a"))
        );
        assert_eq!(decode_json(&json!({"boolValue": true, "intValue": 3})), Ok(json!(3)));
        assert_eq!(
            decode_json(&json!({"arrayValue": {"values": []}, "doubleValue": 0.5})),
            Ok(json!(0.5))
        );
    }
}
