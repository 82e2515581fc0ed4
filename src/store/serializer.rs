//! Collection serializer - JSON encoding of a whole collection.
//!
//! The on-disk form is the nested JSON object the bot's data files have always
//! used: `{key: record}` for flat collections and `{scope: {key: record}}` for
//! scoped ones.

use crate::errors::{Error, Result};
use crate::store::compat::Shape;
use crate::store::model::{Collection, KeyPath, Layout};
use serde_json::{Map, Value};

/// Encodes a collection into its canonical nested JSON form.
pub fn encode(collection: &Collection) -> Result<Vec<u8>> {
    let mut root = Map::new();
    for (path, record) in collection.iter() {
        match path.segments() {
            [key] => {
                root.insert(key.clone(), record.clone());
            }
            [scope, key] => {
                let entry = root
                    .entry(scope.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(scoped) = entry {
                    scoped.insert(key.clone(), record.clone());
                }
            }
            _ => {
                return Err(Error::InvalidKeyPath {
                    collection: String::new(),
                    path: path.segments().to_vec(),
                    reason: "cannot encode key path of this depth".to_string(),
                });
            }
        }
    }

    let mut bytes = serde_json::to_vec_pretty(&Value::Object(root))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decodes bytes in the canonical form of `layout`.
///
/// Empty input (or a bare `null`) is an empty collection.
pub fn decode(name: &str, bytes: &[u8], layout: Layout) -> Result<Collection> {
    let Some(raw) = parse_raw(name, bytes)? else {
        return Ok(Collection::new(layout));
    };

    from_canonical(layout, &raw).ok_or_else(|| Error::UnsupportedShape {
        collection: name.to_string(),
        tried: vec![Shape::canonical(layout).to_string()],
    })
}

/// Parses raw JSON, mapping syntax errors to `CorruptCollection`.
///
/// Returns `None` for empty/whitespace-only input and for `null`.
pub(crate) fn parse_raw(name: &str, bytes: &[u8]) -> Result<Option<Value>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Null) => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) => Err(Error::CorruptCollection {
            collection: name.to_string(),
            offset: byte_offset(bytes, e.line(), e.column()),
            reason: e.to_string(),
        }),
    }
}

/// Converts a canonical nested object into a collection, or `None` if `raw`
/// does not have that shape.
pub(crate) fn from_canonical(layout: Layout, raw: &Value) -> Option<Collection> {
    let root = raw.as_object()?;
    let mut collection = Collection::new(layout);

    match layout {
        Layout::Flat => {
            for (key, record) in root {
                collection.insert(KeyPath::from(key.as_str()), record.clone());
            }
        }
        Layout::Scoped => {
            for (scope, inner) in root {
                for (key, record) in inner.as_object()? {
                    collection.insert(KeyPath::from([scope.as_str(), key.as_str()]), record.clone());
                }
            }
        }
    }

    Some(collection)
}

// serde_json reports 1-based line/column; 0 means unknown.
fn byte_offset(bytes: &[u8], line: usize, column: usize) -> Option<usize> {
    if line == 0 {
        return None;
    }

    let line_start = if line == 1 {
        0
    } else {
        bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == b'\n')
            .nth(line - 2)
            .map(|(i, _)| i + 1)?
    };

    Some((line_start + column.saturating_sub(1)).min(bytes.len()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    fn sample_scoped() -> Collection {
        let mut collection = Collection::new(Layout::Scoped);
        collection.insert(
            KeyPath::from(["guild1", "user1"]),
            json!({"xp": 120, "level": 1, "tags": ["a", "b"], "meta": {"muted": false, "note": null}}),
        );
        collection.insert(KeyPath::from(["guild1", "user2"]), json!({"xp": 3.5}));
        collection.insert(KeyPath::from(["guild2", "user1"]), json!("plain string record"));
        collection
    }

    #[test]
    fn test_round_trip_scoped_collection() {
        let collection = sample_scoped();
        let bytes = encode(&collection).unwrap();
        let decoded = decode("xp", &bytes, Layout::Scoped).unwrap();
        assert_eq!(decoded, collection);
    }

    // Small deterministic generator (splitmix64) for varied record contents.
    struct Gen(u64);

    impl Gen {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = self.0;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }

        fn key(&mut self) -> String {
            const KEYS: [&str; 6] = ["u1", "user-2", "Ünïcode", "with \"quote\"", "a/b", "123"];
            KEYS[usize::try_from(self.below(KEYS.len() as u64)).unwrap()].to_string()
        }

        fn value(&mut self, depth: u32) -> Value {
            let leaf_only = depth >= 3;
            match self.below(if leaf_only { 5 } else { 7 }) {
                0 => Value::Null,
                1 => json!(self.below(2) == 0),
                2 => json!(self.next() >> 11),
                // Quarter steps are exact in binary floating point.
                3 => json!((self.below(4000) as f64 - 2000.0) / 4.0),
                4 => json!(format!("s{}\n\t", self.below(100))),
                5 => Value::Array((0..self.below(4)).map(|_| self.value(depth + 1)).collect()),
                _ => Value::Object(
                    (0..self.below(4))
                        .map(|_| (self.key(), self.value(depth + 1)))
                        .collect(),
                ),
            }
        }
    }

    fn generated(layout: Layout, seed: u64) -> Collection {
        let mut rng = Gen(seed);
        let mut collection = Collection::new(layout);
        for _ in 0..rng.below(6) {
            let path = match layout {
                Layout::Flat => KeyPath::from(rng.key()),
                Layout::Scoped => {
                    let scope = format!("guild{}", rng.below(3));
                    KeyPath::from(vec![scope, rng.key()])
                }
            };
            collection.insert(path, rng.value(0));
        }
        collection
    }

    #[test]
    fn test_round_trip_generated_collections() {
        for seed in 0..64 {
            for layout in [Layout::Flat, Layout::Scoped] {
                let collection = generated(layout, seed);
                let bytes = encode(&collection).unwrap();
                let decoded = decode("generated", &bytes, layout).unwrap();
                assert_eq!(decoded, collection, "seed {seed}, layout {layout:?}");
                assert_eq!(encode(&decoded).unwrap(), bytes);
            }
        }
    }

    #[test]
    fn test_empty_scope_decodes_to_no_records() {
        let decoded = decode("xp", br#"{"guild1": {}, "guild2": {"u1": 1}}"#, Layout::Scoped).unwrap();
        assert_eq!(decoded.len(), 1);
        let bytes = encode(&decoded).unwrap();
        assert_eq!(decode("xp", &bytes, Layout::Scoped).unwrap(), decoded);
    }

    #[test]
    fn test_round_trip_ignores_key_order() {
        let bytes = br#"{"b": {"z": 1, "a": [1, 2]}, "a": {"y": true}}"#;
        let decoded = decode("economy", bytes, Layout::Flat).unwrap();
        let reencoded = encode(&decoded).unwrap();
        assert_eq!(decode("economy", &reencoded, Layout::Flat).unwrap(), decoded);
        assert_eq!(
            decoded.get(&KeyPath::from("b")),
            Some(&json!({"a": [1, 2], "z": 1}))
        );
    }

    #[test]
    fn test_empty_input_is_empty_collection() {
        assert!(decode("economy", b"", Layout::Flat).unwrap().is_empty());
        assert!(decode("economy", b"  \n\t", Layout::Flat).unwrap().is_empty());
        assert!(decode("economy", b"null", Layout::Scoped).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_input_reports_offset() {
        let bytes = b"{\n  \"user1\": {\"cash\": 10},\n  \"user2\": oops\n}";
        let err = decode("economy", bytes, Layout::Flat).unwrap_err();
        match err {
            Error::CorruptCollection {
                collection, offset, ..
            } => {
                assert_eq!(collection, "economy");
                let offset = offset.unwrap();
                // Third line starts after the second newline.
                let third_line = bytes
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| **b == b'\n')
                    .nth(1)
                    .unwrap()
                    .0
                    + 1;
                assert!(offset >= third_line && offset < bytes.len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_wrong_shape_is_unsupported() {
        let err = decode("xp", br#"{"guild1": 5}"#, Layout::Scoped).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }
}
