//! Migration/compat loader.
//!
//! The bot's data files were written by different commands over time and do not
//! agree on a shape: some are `{user: record}`, some `{guild: {user: record}}`,
//! and some are arrays of records carrying their own id. Each collection
//! declares which of these it may find on disk; whatever is found is converted
//! into the uniform key-path model and rewritten canonically on the next write.

use crate::errors::{Error, Result};
use crate::store::model::{Collection, KeyPath, Layout};
use crate::store::serializer;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info};

fn default_id_field() -> String {
    "id".to_string()
}

/// An on-disk JSON form the loader recognizes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Shape {
    /// `{key: record}`
    FlatMap,
    /// `{scope: {key: record}}`
    ScopedMap,
    /// `[{id_field: key, ...record}]`
    IdArray {
        #[serde(default = "default_id_field")]
        id_field: String,
    },
    /// `{scope: [{id_field: key, ...record}]}`
    ScopedIdArray {
        #[serde(default = "default_id_field")]
        id_field: String,
    },
}

impl Shape {
    /// The shape the serializer writes for `layout`.
    #[must_use]
    pub const fn canonical(layout: Layout) -> Self {
        match layout {
            Layout::Flat => Self::FlatMap,
            Layout::Scoped => Self::ScopedMap,
        }
    }

    /// Layout of the key paths this shape produces.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        match self {
            Self::FlatMap | Self::IdArray { .. } => Layout::Flat,
            Self::ScopedMap | Self::ScopedIdArray { .. } => Layout::Scoped,
        }
    }

    fn apply(&self, raw: &Value) -> Option<Collection> {
        match self {
            Self::FlatMap => serializer::from_canonical(Layout::Flat, raw),
            Self::ScopedMap => serializer::from_canonical(Layout::Scoped, raw),
            Self::IdArray { id_field } => {
                let mut collection = Collection::new(Layout::Flat);
                for (key, record) in id_records(raw, id_field)? {
                    collection.insert(KeyPath::from(key), record);
                }
                Some(collection)
            }
            Self::ScopedIdArray { id_field } => {
                let mut collection = Collection::new(Layout::Scoped);
                for (scope, inner) in raw.as_object()? {
                    for (key, record) in id_records(inner, id_field)? {
                        collection.insert(KeyPath::new(vec![scope.clone(), key]), record);
                    }
                }
                Some(collection)
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FlatMap => write!(f, "flat_map"),
            Self::ScopedMap => write!(f, "scoped_map"),
            Self::IdArray { id_field } => write!(f, "id_array({id_field})"),
            Self::ScopedIdArray { id_field } => write!(f, "scoped_id_array({id_field})"),
        }
    }
}

// Splits `[{id: "u1", amount: 5}]` into `("u1", {amount: 5})` pairs.
fn id_records(raw: &Value, id_field: &str) -> Option<Vec<(String, Value)>> {
    let items = raw.as_array()?;
    let mut out = Vec::with_capacity(items.len());

    for item in items {
        let mut fields: Map<String, Value> = item.as_object()?.clone();
        let key = match fields.remove(id_field)? {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        out.push((key, Value::Object(fields)));
    }

    Some(out)
}

/// Shapes a collection accepts on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeDescriptor {
    layout: Layout,
    legacy: Vec<Shape>,
}

impl ShapeDescriptor {
    /// A descriptor accepting only the canonical shape of `layout`.
    #[must_use]
    pub const fn canonical(layout: Layout) -> Self {
        Self {
            layout,
            legacy: Vec::new(),
        }
    }

    /// Declares legacy shapes. Each must produce key paths of `layout`'s depth.
    pub fn new(layout: Layout, legacy: Vec<Shape>) -> Result<Self> {
        if let Some(bad) = legacy.iter().find(|shape| shape.layout() != layout) {
            return Err(Error::Config {
                message: format!("legacy shape {bad} does not fit a {layout:?} collection"),
            });
        }
        Ok(Self { layout, legacy })
    }

    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Canonical shape first, then legacy shapes in declaration order.
    fn candidates(&self) -> Vec<Shape> {
        let mut shapes = vec![Shape::canonical(self.layout)];
        for shape in &self.legacy {
            if !shapes.contains(shape) {
                shapes.push(shape.clone());
            }
        }
        shapes
    }
}

/// Converts decoded JSON into a collection using the first matching shape.
pub fn normalize(name: &str, raw: &Value, descriptor: &ShapeDescriptor) -> Result<Collection> {
    let candidates = descriptor.candidates();

    for (i, shape) in candidates.iter().enumerate() {
        if let Some(collection) = shape.apply(raw) {
            if i == 0 {
                debug!("Collection '{}' loaded in canonical shape {}", name, shape);
            } else {
                info!(
                    "Collection '{}' loaded from legacy shape {} ({} records); it will be rewritten canonically on the next write",
                    name,
                    shape,
                    collection.len()
                );
            }
            return Ok(collection);
        }
    }

    Err(Error::UnsupportedShape {
        collection: name.to_string(),
        tried: candidates.iter().map(ToString::to_string).collect(),
    })
}

/// Decodes file contents, tolerating empty files.
pub fn load_bytes(name: &str, bytes: &[u8], descriptor: &ShapeDescriptor) -> Result<Collection> {
    match serializer::parse_raw(name, bytes)? {
        Some(raw) => normalize(name, &raw, descriptor),
        None => Ok(Collection::new(descriptor.layout())),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    fn id_array() -> Shape {
        Shape::IdArray {
            id_field: "id".to_string(),
        }
    }

    #[test]
    fn test_legacy_id_array_migrates_to_key_paths() {
        let descriptor = ShapeDescriptor::new(Layout::Flat, vec![id_array()]).unwrap();
        let raw = json!([{"id": "u1", "amount": 5}]);

        let collection = normalize("inventory", &raw, &descriptor).unwrap();
        assert_eq!(collection.len(), 1);
        assert_eq!(
            collection.get(&KeyPath::from("u1")),
            Some(&json!({"amount": 5}))
        );
    }

    #[test]
    fn test_numeric_ids_are_stringified() {
        let descriptor = ShapeDescriptor::new(Layout::Flat, vec![id_array()]).unwrap();
        let raw = json!([{"id": 42, "badges": ["early"]}]);

        let collection = normalize("userdata", &raw, &descriptor).unwrap();
        assert_eq!(
            collection.get(&KeyPath::from("42")),
            Some(&json!({"badges": ["early"]}))
        );
    }

    #[test]
    fn test_scoped_id_array() {
        let descriptor = ShapeDescriptor::new(
            Layout::Scoped,
            vec![Shape::ScopedIdArray {
                id_field: "name".to_string(),
            }],
        )
        .unwrap();
        let raw = json!({"guild1": [{"name": "Sword", "price": 100}]});

        let collection = normalize("servershop", &raw, &descriptor).unwrap();
        assert_eq!(
            collection.get(&KeyPath::from(["guild1", "Sword"])),
            Some(&json!({"price": 100}))
        );
    }

    #[test]
    fn test_array_without_declared_shape_is_unsupported() {
        let descriptor = ShapeDescriptor::canonical(Layout::Flat);
        let err = normalize("economy", &json!([{"id": "u1"}]), &descriptor).unwrap_err();
        match err {
            Error::UnsupportedShape { collection, tried } => {
                assert_eq!(collection, "economy");
                assert_eq!(tried, vec!["flat_map".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_records_missing_id_do_not_match() {
        let descriptor = ShapeDescriptor::new(Layout::Flat, vec![id_array()]).unwrap();
        let err = normalize("inventory", &json!([{"amount": 5}]), &descriptor).unwrap_err();
        assert!(matches!(err, Error::UnsupportedShape { .. }));
    }

    #[test]
    fn test_mismatched_legacy_shape_is_rejected() {
        let err = ShapeDescriptor::new(Layout::Scoped, vec![id_array()]).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_empty_file_loads_empty_collection() {
        let descriptor = ShapeDescriptor::canonical(Layout::Scoped);
        let collection = load_bytes("xp", b"", &descriptor).unwrap();
        assert!(collection.is_empty());
        assert_eq!(collection.layout(), Layout::Scoped);
    }

    #[test]
    fn test_shape_config_deserializes() {
        #[derive(Deserialize)]
        struct Wrapper {
            legacy: Vec<Shape>,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [[legacy]]
            shape = "id_array"

            [[legacy]]
            shape = "scoped_id_array"
            id_field = "name"
            "#,
        )
        .unwrap();
        assert_eq!(
            parsed.legacy,
            vec![
                id_array(),
                Shape::ScopedIdArray {
                    id_field: "name".to_string()
                }
            ]
        );
    }
}
