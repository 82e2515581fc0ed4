//! Embedded record store backing the bot's per-feature JSON files.

/// Migration/compat loader for legacy on-disk shapes
pub mod compat;
/// Cached per-collection snapshots
pub mod index;
/// Layouts, key paths, collections and snapshots
pub mod model;
/// Record store façade: get, set, update, delete, list
pub mod record_store;
/// Whole-collection JSON encoding
pub mod serializer;
/// Atomic durable file replacement
pub mod writer;

pub use compat::{Shape, ShapeDescriptor};
pub use model::{Collection, KeyPath, Layout, Record, Snapshot};
pub use record_store::{RecordStore, ScopeListing, Transaction};
