//! Store index - one cached snapshot per collection.
//!
//! Collections are loaded lazily on first access and stay resident until
//! `invalidate` drops them. Each collection has a slot with two locks:
//! an async gate that serializes loads, invalidations and mutations, and a
//! plain `RwLock` around the published `Arc<Snapshot>` that readers clone.

use crate::config::{CollectionConfig, StoreConfig};
use crate::errors::{Error, Result};
use crate::store::compat::{self, ShapeDescriptor};
use crate::store::model::{Collection, Layout, Snapshot};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

/// State guarded by a slot's gate.
#[derive(Debug, Default)]
pub(crate) struct GateState {
    /// Revision of the snapshot most recently dropped by `invalidate`.
    dropped_revision: Option<u64>,
}

/// Per-collection state.
#[derive(Debug)]
pub(crate) struct Slot {
    name: String,
    path: PathBuf,
    descriptor: ShapeDescriptor,
    gate: Mutex<GateState>,
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl Slot {
    fn new(name: &str, path: PathBuf, descriptor: ShapeDescriptor) -> Self {
        Self {
            name: name.to_string(),
            path,
            descriptor,
            gate: Mutex::new(GateState::default()),
            current: RwLock::new(None),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The published snapshot, if loaded. Never waits on the gate.
    pub(crate) fn current(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn take(&self) -> Option<Arc<Snapshot>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, GateState> {
        self.gate.lock().await
    }

    /// Returns the resident snapshot or reads it from disk. The caller holds the gate.
    pub(crate) async fn load_locked(&self, state: &mut GateState) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let collection = self.read_from_disk().await?;
        let revision = state.dropped_revision.map_or(0, |r| r + 1);
        info!(
            "Loaded collection '{}' ({} records, revision {})",
            self.name,
            collection.len(),
            revision
        );

        let snapshot = Arc::new(Snapshot::new(collection, revision));
        self.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    async fn read_from_disk(&self) -> Result<Collection> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => compat::load_bytes(&self.name, &bytes, &self.descriptor),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    "No file for collection '{}' at {}; starting empty",
                    self.name,
                    self.path.display()
                );
                Ok(Collection::new(self.descriptor.layout()))
            }
            Err(source) => Err(Error::StoreUnavailable {
                collection: self.name.clone(),
                source,
            }),
        }
    }
}

/// Collection name to slot mapping.
#[derive(Debug)]
pub struct StoreIndex {
    data_dir: PathBuf,
    declared: HashMap<String, CollectionConfig>,
    slots: RwLock<HashMap<String, Arc<Slot>>>,
}

impl StoreIndex {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        let declared = config
            .collections
            .iter()
            .map(|collection| (collection.name.clone(), collection.clone()))
            .collect();

        Ok(Self {
            data_dir: config.data_dir.clone(),
            declared,
            slots: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Names of the declared collections.
    #[must_use]
    pub fn declared(&self) -> Vec<String> {
        let mut names: Vec<_> = self.declared.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of the collections currently held in memory.
    #[must_use]
    pub fn resident(&self) -> Vec<String> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = slots
            .values()
            .filter(|slot| slot.current().is_some())
            .map(|slot| slot.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Gets or creates the slot for `name`.
    ///
    /// Undeclared names get a flat layout backed by `<name>.json`, unless a
    /// declared collection already keeps its records in that file.
    pub(crate) fn slot(&self, name: &str) -> Result<Arc<Slot>> {
        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(slot));
        }

        validate_name(name)?;
        let config = match self.declared.get(name) {
            Some(config) => config.clone(),
            None => self.undeclared(name)?,
        };
        let path = self.data_dir.join(config.file_name());
        let descriptor = config.descriptor()?;

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Slot::new(name, path, descriptor)));
        Ok(Arc::clone(slot))
    }

    fn undeclared(&self, name: &str) -> Result<CollectionConfig> {
        let config = CollectionConfig::new(name, Layout::Flat);
        let file = config.file_name();
        if let Some(owner) = self.declared.values().find(|c| c.file_name() == file) {
            return Err(Error::InvalidInput {
                message: format!(
                    "collection '{name}' would share '{file}' with declared collection '{}'",
                    owner.name
                ),
            });
        }
        debug!("Collection '{}' is not declared; using a flat layout", name);
        Ok(config)
    }

    /// Returns the cached snapshot, loading it on first access.
    #[instrument(skip(self))]
    pub async fn load(&self, name: &str) -> Result<Arc<Snapshot>> {
        let slot = self.slot(name)?;
        if let Some(snapshot) = slot.current() {
            return Ok(snapshot);
        }

        let mut state = slot.lock().await;
        slot.load_locked(&mut state).await
    }

    /// Drops the cached snapshot so the next access re-reads the file.
    ///
    /// Waits for in-flight mutations of the collection to finish first.
    #[instrument(skip(self))]
    pub async fn invalidate(&self, name: &str) -> Result<()> {
        let slot = self.slot(name)?;
        let mut state = slot.lock().await;
        if let Some(dropped) = slot.take() {
            debug!(
                "Invalidated collection '{}' at revision {}",
                name, dropped.revision
            );
            state.dropped_revision = Some(dropped.revision);
        }
        Ok(())
    }
}

// Collection names become file names.
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput {
            message: format!("Invalid collection name '{name}'"),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::store::model::KeyPath;
    use crate::test_utils::init_test_tracing;
    use serde_json::json;

    fn index_in(dir: &Path) -> StoreIndex {
        StoreIndex::new(&StoreConfig::with_data_dir(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty_at_revision_zero() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let index = index_in(dir.path());

        let snapshot = index.load("xp").await.unwrap();
        assert!(snapshot.collection.is_empty());
        assert_eq!(snapshot.collection.layout(), Layout::Scoped);
        assert_eq!(snapshot.revision, 0);
        assert_eq!(index.resident(), vec!["xp".to_string()]);
    }

    #[tokio::test]
    async fn test_cached_until_invalidated() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economy.json");
        std::fs::write(&path, r#"{"u1": {"withdrawnCash": 1}}"#).unwrap();
        let index = index_in(dir.path());

        let first = index.load("economy").await.unwrap();
        std::fs::write(&path, r#"{"u1": {"withdrawnCash": 2}}"#).unwrap();

        let cached = index.load("economy").await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        index.invalidate("economy").await.unwrap();
        let reloaded = index.load("economy").await.unwrap();
        assert_eq!(
            reloaded.collection.get(&KeyPath::from("u1")),
            Some(&json!({"withdrawnCash": 2}))
        );
        assert_eq!(reloaded.revision, first.revision + 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_not_cached() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economy.json");
        std::fs::write(&path, "{\"u1\": ").unwrap();
        let index = index_in(dir.path());

        let err = index.load("economy").await.unwrap_err();
        assert!(matches!(err, Error::CorruptCollection { .. }));
        assert!(index.resident().is_empty());

        std::fs::write(&path, "{}").unwrap();
        assert!(index.load("economy").await.is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_unavailable() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a file.
        std::fs::create_dir(dir.path().join("economy.json")).unwrap();
        let index = index_in(dir.path());

        let err = index.load("economy").await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let index = index_in(dir.path());
        assert!(matches!(
            index.load("../escape").await,
            Err(Error::InvalidInput { .. })
        ));
        assert!(index.load("").await.is_err());
    }

    #[tokio::test]
    async fn test_undeclared_name_cannot_alias_a_declared_file() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::with_data_dir(dir.path());
        for collection in &mut config.collections {
            if collection.name == "inventory" {
                collection.file = Some("inv.json".to_string());
            }
        }
        let index = StoreIndex::new(&config).unwrap();

        let err = index.load("inv").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
        assert!(index.load("inventory").await.is_ok());
        assert_eq!(index.resident(), vec!["inventory".to_string()]);
    }

    #[test]
    fn test_declared_collections_sharing_a_file_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StoreConfig::with_data_dir(dir.path());
        config.collections.push(CollectionConfig {
            file: Some("economy.json".to_string()),
            ..CollectionConfig::new("wallets", Layout::Flat)
        });

        assert!(matches!(
            StoreIndex::new(&config),
            Err(Error::Config { .. })
        ));
    }
}
