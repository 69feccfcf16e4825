use ciborium::value::Value;

/// Decodes the raw CBOR metadata blob embedded in an inscription into a
/// self-describing value tree.
pub fn decode_cbor(bytes: &[u8]) -> Result<Value, String> {
    ciborium::de::from_reader(bytes).map_err(|e| format!("invalid cbor payload: {e}"))
}

/// Looks up a text-keyed field of a metadata mapping. Returns `None` when
/// the value is not a mapping or the field is absent.
pub fn map_get<'a>(metadata: &'a Value, field: &str) -> Option<&'a Value> {
    let Value::Map(entries) = metadata else {
        return None;
    };
    entries.iter().find_map(|(key, value)| match key {
        Value::Text(k) if k == field => Some(value),
        _ => None,
    })
}

/// Transcodes provider-supplied JSON metadata into the CBOR value tree, so
/// that classification sees a single representation regardless of the
/// provider type serving it.
pub fn json_to_cbor(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_cbor).collect()),
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(key, value)| (Value::Text(key.clone()), json_to_cbor(value)))
                .collect(),
        ),
    }
}

/// Renders a metadata value tree as JSON for persistence. Byte strings are
/// hex encoded, tags are unwrapped, non-text map keys are stringified.
pub fn cbor_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            let i = i128::from(*i);
            if let Ok(v) = i64::try_from(i) {
                serde_json::Value::from(v)
            } else if let Ok(v) = u64::try_from(i) {
                serde_json::Value::from(v)
            } else {
                serde_json::Value::String(i.to_string())
            }
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(bytes) => serde_json::Value::String(format!("0x{}", hex::encode(bytes))),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => {
            let mut object = serde_json::Map::new();
            for (key, value) in entries.iter() {
                let key = match key {
                    Value::Text(k) => k.clone(),
                    other => cbor_to_json(other).to_string(),
                };
                object.insert(key, cbor_to_json(value));
            }
            serde_json::Value::Object(object)
        }
        Value::Tag(_, inner) => cbor_to_json(inner),
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod test {
    use ciborium::value::Value;
    use serde_json::json;

    use super::*;

    fn encode(value: &Value) -> Vec<u8> {
        let mut bytes = vec![];
        ciborium::ser::into_writer(value, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn decodes_cbor_metadata() {
        let value = Value::Map(vec![(
            Value::Text("id".to_string()),
            Value::Text("did:btco:1000".to_string()),
        )]);
        let decoded = decode_cbor(&encode(&value)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn rejects_malformed_cbor() {
        assert!(decode_cbor(&[0xff, 0x00]).is_err());
    }

    #[test]
    fn looks_up_map_fields() {
        let value = json_to_cbor(&json!({"id": "did:btco:1000", "n": 7}));
        assert_eq!(
            map_get(&value, "id"),
            Some(&Value::Text("did:btco:1000".to_string()))
        );
        assert_eq!(map_get(&value, "n"), Some(&Value::Integer(7.into())));
        assert_eq!(map_get(&value, "missing"), None);
        assert_eq!(map_get(&Value::Text("not a map".to_string()), "id"), None);
    }

    #[test]
    fn json_round_trips_through_cbor() {
        let original = json!({
            "id": "did:btco:1000",
            "verificationMethod": [{"type": "Multikey"}],
            "count": 3,
            "nested": {"flag": true, "none": null}
        });
        assert_eq!(cbor_to_json(&json_to_cbor(&original)), original);
    }

    #[test]
    fn renders_bytes_as_hex() {
        let value = Value::Bytes(vec![0xde, 0xad]);
        assert_eq!(cbor_to_json(&value), json!("0xdead"));
    }
}
