//! Record store - the façade command handlers talk to.
//!
//! Reads come straight from the published snapshot of a collection. Every
//! mutation runs inside the collection's gate: the snapshot is copied, changed,
//! encoded and durably written, and only then published in place of the old
//! one. A failed write therefore leaves memory exactly as it was.
//!
//! Mutations run in their own tokio task. A caller that gives up waiting does
//! not interrupt a mutation half-way; it simply stops waiting for the result.

use crate::config::StoreConfig;
use crate::errors::{Error, Result};
use crate::store::index::{Slot, StoreIndex};
use crate::store::model::{KeyPath, Layout, Record, Snapshot};
use crate::store::{serializer, writer};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Handle to the store. Cheap to clone; clones share all state.
#[derive(Debug, Clone)]
pub struct RecordStore {
    index: Arc<StoreIndex>,
}

impl RecordStore {
    /// Opens the store described by `config`.
    ///
    /// Creates the data directory if needed and removes temp files left by an
    /// interrupted write. Collections themselves load lazily.
    #[instrument(skip(config), fields(data_dir = %config.data_dir.display()))]
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let index = StoreIndex::new(config)?;

        tokio::fs::create_dir_all(index.data_dir()).await?;
        let dir = index.data_dir().to_path_buf();
        let removed = tokio::task::spawn_blocking(move || writer::sweep_orphans(&dir))
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))??;
        if removed > 0 {
            warn!("Removed {} orphaned temp file(s) from an interrupted write", removed);
        }

        info!("Record store opened");
        Ok(Self {
            index: Arc::new(index),
        })
    }

    #[must_use]
    pub fn index(&self) -> &StoreIndex {
        &self.index
    }

    /// Reads one record. `None` means no record exists at `key`.
    pub async fn get(&self, collection: &str, key: impl Into<KeyPath>) -> Result<Option<Record>> {
        let key = key.into();
        let snapshot = self.index.load(collection).await?;
        snapshot.collection.layout().check(collection, &key)?;
        Ok(snapshot.collection.get(&key).cloned())
    }

    /// Replaces or creates the record at `key` and persists before returning.
    pub async fn set(&self, collection: &str, key: impl Into<KeyPath>, value: Record) -> Result<()> {
        let key = key.into();
        debug!("Setting {}/{}", collection, key);
        self.mutate(collection, move |txn| txn.set(key, value))
            .await
            .map(|((), _)| ())
    }

    /// Like `set`, but only if the collection is still at `expected` revision.
    ///
    /// Returns the revision after the write.
    pub async fn set_if_revision(
        &self,
        collection: &str,
        key: impl Into<KeyPath>,
        value: Record,
        expected: u64,
    ) -> Result<u64> {
        let key = key.into();
        let (_, revision) = self
            .mutate(collection, move |txn| {
                if txn.revision() != expected {
                    return Err(Error::RevisionConflict {
                        collection: txn.collection().to_string(),
                        expected,
                        actual: txn.revision(),
                    });
                }
                txn.set(key, value)
            })
            .await?;
        Ok(revision)
    }

    /// Applies `mutator` to the current record (or `default` when absent) and
    /// persists the result under the collection's exclusive lock.
    pub async fn update<F>(
        &self,
        collection: &str,
        key: impl Into<KeyPath>,
        default: Record,
        mutator: F,
    ) -> Result<Record>
    where
        F: FnOnce(Record) -> Record + Send + 'static,
    {
        self.try_update(collection, key, default, move |record| Ok(mutator(record)))
            .await
    }

    /// Like `update`, but the mutator may refuse the change. Nothing is
    /// persisted when it returns an error; the error reaches the caller as is.
    pub async fn try_update<F>(
        &self,
        collection: &str,
        key: impl Into<KeyPath>,
        default: Record,
        mutator: F,
    ) -> Result<Record>
    where
        F: FnOnce(Record) -> Result<Record> + Send + 'static,
    {
        let key = key.into();
        let (record, _) = self
            .mutate(collection, move |txn| {
                let current = txn.get(&key)?.cloned().unwrap_or(default);
                let next = mutator(current)?;
                txn.set(key, next.clone())?;
                Ok(next)
            })
            .await?;
        Ok(record)
    }

    /// Removes the record at `key`. Returns whether one existed.
    ///
    /// Removing an absent key writes nothing and keeps the revision.
    pub async fn delete(&self, collection: &str, key: impl Into<KeyPath>) -> Result<bool> {
        let key = key.into();
        let (existed, _) = self
            .mutate(collection, move |txn| Ok(txn.remove(&key)?.is_some()))
            .await?;
        Ok(existed)
    }

    /// Records under `scope_prefix` (e.g. `&["guild"]`), from one consistent snapshot.
    ///
    /// An empty prefix lists the whole collection.
    pub async fn list_scope(&self, collection: &str, scope_prefix: &[&str]) -> Result<ScopeListing> {
        let snapshot = self.index.load(collection).await?;
        let depth = snapshot.collection.layout().depth();
        if scope_prefix.len() > depth {
            return Err(Error::InvalidKeyPath {
                collection: collection.to_string(),
                path: scope_prefix.iter().map(ToString::to_string).collect(),
                reason: format!("prefix longer than the {depth}-segment layout"),
            });
        }

        Ok(ScopeListing {
            snapshot,
            prefix: scope_prefix.iter().map(ToString::to_string).collect(),
        })
    }

    /// Runs `f` against one collection inside a single critical section and
    /// persists all of its changes with one write.
    pub async fn transact<T, F>(&self, collection: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.mutate(collection, f).await.map(|(out, _)| out)
    }

    /// Current revision of a collection, loading it if needed.
    pub async fn revision(&self, collection: &str) -> Result<u64> {
        Ok(self.index.load(collection).await?.revision)
    }

    /// Forces the next access to re-read the collection from disk.
    pub async fn invalidate(&self, collection: &str) -> Result<()> {
        self.index.invalidate(collection).await
    }

    async fn mutate<T, F>(&self, collection: &str, f: F) -> Result<(T, u64)>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.index.slot(collection)?;
        tokio::spawn(run_mutation(slot, f))
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))?
    }
}

// The body of every mutation; runs as its own task.
async fn run_mutation<T, F>(slot: Arc<Slot>, f: F) -> Result<(T, u64)>
where
    F: FnOnce(&mut Transaction<'_>) -> Result<T>,
{
    let mut state = slot.lock().await;
    let base = slot.load_locked(&mut state).await?;

    let mut working = Snapshot {
        collection: base.collection.clone(),
        revision: base.revision,
        dirty: false,
        loaded_at: base.loaded_at,
    };
    let out = {
        let mut txn = Transaction {
            collection: slot.name(),
            snapshot: &mut working,
        };
        f(&mut txn)?
    };

    // Changes that cancel out (e.g. debit and credit of the same key) leave nothing to write.
    if !working.dirty || working.collection == base.collection {
        debug!("No changes to '{}'; nothing persisted", slot.name());
        return Ok((out, working.revision));
    }

    let bytes = serializer::encode(&working.collection)?;
    writer::write(slot.path().to_path_buf(), bytes).await?;

    working.dirty = false;
    working.revision += 1;
    let revision = working.revision;
    slot.publish(Arc::new(working));
    debug!("Persisted '{}' at revision {}", slot.name(), revision);

    drop(state);
    Ok((out, revision))
}

/// Mutable view of one collection inside its critical section.
#[derive(Debug)]
pub struct Transaction<'a> {
    collection: &'a str,
    snapshot: &'a mut Snapshot,
}

impl Transaction<'_> {
    #[must_use]
    pub fn collection(&self) -> &str {
        self.collection
    }

    /// Revision the changes are based on.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    #[must_use]
    pub fn layout(&self) -> Layout {
        self.snapshot.collection.layout()
    }

    pub fn get(&self, key: &KeyPath) -> Result<Option<&Record>> {
        self.layout().check(self.collection, key)?;
        Ok(self.snapshot.collection.get(key))
    }

    /// Replaces the record at `key`. Writing an identical value changes nothing.
    pub fn set(&mut self, key: impl Into<KeyPath>, value: Record) -> Result<()> {
        let key = key.into();
        self.layout().check(self.collection, &key)?;
        if self.snapshot.collection.get(&key) != Some(&value) {
            self.snapshot.collection.insert(key, value);
            self.snapshot.dirty = true;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &KeyPath) -> Result<Option<Record>> {
        self.layout().check(self.collection, key)?;
        let removed = self.snapshot.collection.remove(key);
        if removed.is_some() {
            self.snapshot.dirty = true;
        }
        Ok(removed)
    }

    /// Records under `prefix` as they stand inside this transaction.
    pub fn scope<'s>(
        &'s self,
        prefix: &'s [String],
    ) -> impl Iterator<Item = (&'s KeyPath, &'s Record)> + 's {
        self.snapshot.collection.iter_prefix(prefix)
    }
}

/// Records under a scope prefix, taken from one immutable snapshot.
///
/// Iteration is lazy and can be restarted any number of times; later writes
/// to the collection are not visible through an existing listing.
#[derive(Debug, Clone)]
pub struct ScopeListing {
    snapshot: Arc<Snapshot>,
    prefix: Vec<String>,
}

impl ScopeListing {
    pub fn iter(&self) -> impl Iterator<Item = (&KeyPath, &Record)> {
        self.snapshot.collection.iter_prefix(&self.prefix)
    }

    /// Revision of the snapshot this listing reads.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.snapshot.revision
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a ScopeListing {
    type Item = (&'a KeyPath, &'a Record);
    type IntoIter = Box<dyn Iterator<Item = Self::Item> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
