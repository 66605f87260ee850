//! Canonical JSON encoding.
//!
//! Signatures are computed over the exact bytes produced here, so the output
//! must not depend on field declaration order or on map insertion order.
//! Object keys are emitted in lexicographic byte order at every depth and no
//! whitespace is written.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RouterError};

pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value).map_err(|e| RouterError::Encode(e.to_string()))?;
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, &value)?;
    Ok(out)
}

pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_value(&mut out, value)?;
    Ok(out)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| RouterError::Decode(e.to_string()))
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)
                    .map_err(|e| RouterError::Encode(e.to_string()))?;
                out.push(b':');
                write_value(out, item)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        scalar => {
            serde_json::to_writer(&mut *out, scalar)
                .map_err(|e| RouterError::Encode(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        zeta: String,
        alpha: u32,
        nested: Nested,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Nested {
        y: Vec<u8>,
        b: Option<String>,
    }

    #[test]
    fn keys_are_sorted_at_every_depth() {
        let sample = Sample {
            zeta: "z".to_string(),
            alpha: 7,
            nested: Nested {
                y: vec![1, 2],
                b: None,
            },
        };
        let bytes = encode(&sample).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":7,"nested":{"b":null,"y":[1,2]},"zeta":"z"}"#
        );
    }

    #[test]
    fn encoding_is_deterministic_and_reversible() {
        let sample = Sample {
            zeta: "ü \"quoted\"".to_string(),
            alpha: 1,
            nested: Nested {
                y: vec![],
                b: Some("x".to_string()),
            },
        };
        let first = encode(&sample).unwrap();
        let second = encode(&sample).unwrap();
        assert_eq!(first, second);
        let back: Sample = decode(&first).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":{"d":2,"c":3}}"#).unwrap();
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(encode_value(&a).unwrap(), encode_value(&b).unwrap());
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let err = decode::<Sample>(b"{not json").unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));
        let err = decode::<Sample>(br#"{"alpha":1}"#).unwrap_err();
        assert!(matches!(err, RouterError::Decode(_)));
    }
}
