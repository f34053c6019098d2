//! Conversion between native values and CRDT-native containers.
//!
//! Native values are [`serde_json::Value`]s: a tagged variant of scalars
//! (null, bool, number, string), sequences and string-keyed maps. Writing goes
//! through [`to_crdt`], which turns every map into a Y.Map and every sequence
//! into a Y.Array so the live document never holds a plain container. Reading
//! goes through [`from_out`], which turns any CRDT value (including plain
//! `Any` containers written by other Yjs clients) back into a native value.
//!
//! Integers are stored as `Any::BigInt` and floats as `Any::Number`, so a
//! number reads back with the same JSON representation it was written with.
//! Integers beyond the signed 64-bit range have no exact CRDT form and are
//! rejected by [`check_storable`] before a write.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map as JsonMap, Number, Value};
use yrs::{Any, Array, ArrayPrelim, GetString, In, Map, MapPrelim, MapRef, Out, ReadTxn};

use crate::error::{Result, TelepathyError};

/// Fail if `value` holds a number that would not read back unchanged.
pub fn check_storable(value: &Value) -> Result<()> {
    match value {
        Value::Number(n) if n.is_u64() && !n.is_i64() => {
            Err(TelepathyError::UnsupportedNumber(n.to_string()))
        }
        Value::Array(items) => items.iter().try_for_each(check_storable),
        Value::Object(map) => map.values().try_for_each(check_storable),
        _ => Ok(()),
    }
}

/// Wrap a native value as CRDT input.
pub fn to_crdt(value: &Value) -> In {
    match value {
        Value::Object(map) => In::Map(
            map.iter()
                .map(|(key, item)| (key.as_str(), to_crdt(item)))
                .collect::<MapPrelim>(),
        ),
        Value::Array(items) => In::Array(items.iter().map(to_crdt).collect::<ArrayPrelim>()),
        scalar => In::Any(scalar_to_any(scalar)),
    }
}

fn scalar_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Any::BigInt(i)
            } else {
                Any::Number(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Any::String(s.as_str().into()),
        // Containers are handled by to_crdt; kept total for nested Any payloads.
        Value::Array(items) => Any::Array(items.iter().map(scalar_to_any).collect()),
        Value::Object(map) => Any::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), scalar_to_any(v)))
                .collect::<std::collections::HashMap<_, _>>()
                .into(),
        ),
    }
}

/// Unwrap a CRDT value read inside `txn` into a native value.
pub fn from_out<T: ReadTxn>(out: &Out, txn: &T) -> Value {
    match out {
        Out::Any(any) => from_any(any),
        Out::YMap(map) => map_to_value(map, txn),
        Out::YArray(array) => Value::Array(
            array
                .iter(txn)
                .map(|item| from_out(&item, txn))
                .collect(),
        ),
        Out::YText(text) => Value::String(text.get_string(txn)),
        _ => Value::Null,
    }
}

/// Unwrap a whole Y.Map into a native object.
pub fn map_to_value<T: ReadTxn>(map: &MapRef, txn: &T) -> Value {
    let mut object = JsonMap::new();
    for (key, item) in map.iter(txn) {
        object.insert(key.to_string(), from_out(&item, txn));
    }
    Value::Object(object)
}

/// Unwrap a plain `Any` value.
pub fn from_any(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Any::BigInt(i) => Value::from(*i),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::String(STANDARD.encode(bytes)),
        Any::Array(items) => Value::Array(items.iter().map(from_any).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), from_any(item)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use yrs::{Doc, Transact};

    fn round_trip(value: Value) -> Value {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("data");
        {
            let mut txn = doc.transact_mut();
            root.insert(&mut txn, "value", to_crdt(&value));
        }
        let txn = doc.transact();
        let out = root.get(&txn, "value").expect("value was inserted");
        from_out(&out, &txn)
    }

    #[test]
    fn test_scalars_round_trip() {
        assert_eq!(round_trip(json!(null)), json!(null));
        assert_eq!(round_trip(json!(true)), json!(true));
        assert_eq!(round_trip(json!(10)), json!(10));
        assert_eq!(round_trip(json!(-3)), json!(-3));
        assert_eq!(round_trip(json!(2.5)), json!(2.5));
        assert_eq!(round_trip(json!("text")), json!("text"));
    }

    #[test]
    fn test_nested_containers_are_crdt_native() {
        let doc = Doc::new();
        let root = doc.get_or_insert_map("data");
        {
            let mut txn = doc.transact_mut();
            let nested = to_crdt(&json!({"list": [1, {"k": "v"}]}));
            root.insert(&mut txn, "nested", nested);
        }

        let txn = doc.transact();
        let Some(Out::YMap(nested)) = root.get(&txn, "nested") else {
            panic!("maps must be stored as Y.Map");
        };
        assert!(matches!(nested.get(&txn, "list"), Some(Out::YArray(_))));
        assert_eq!(
            map_to_value(&root, &txn),
            json!({"nested": {"list": [1, {"k": "v"}]}})
        );
    }

    #[test]
    fn test_unsigned_beyond_i64_is_not_storable() {
        assert!(check_storable(&json!({"n": i64::MAX, "f": 1.5, "neg": i64::MIN})).is_ok());

        let err = check_storable(&json!({"deep": [1, u64::MAX]})).unwrap_err();
        assert!(matches!(
            err,
            TelepathyError::UnsupportedNumber(ref n) if n == "18446744073709551615"
        ));
    }

    #[test]
    fn test_plain_any_containers_unwrap() {
        let any = Any::from(vec![Any::BigInt(1), Any::String("two".into())]);
        assert_eq!(from_any(&any), json!([1, "two"]));
    }
}
