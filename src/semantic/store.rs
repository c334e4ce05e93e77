//! Persistent vector store for one named collection.
//!
//! The whole collection lives in memory and is rewritten to
//! `<db_path>/<name>/collection.bin` after every successful write. The
//! collection directory is locked for the lifetime of the store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::lock::FileLock;
use crate::semantic::errors::SearchError;
use crate::semantic::index::{DistanceMetric, IndexEntry, Undo, VectorIndex};
use crate::semantic::storage::VectorFile;
use crate::semantic::types::{BatchOutcome, Document, Metadata, MetadataFilter, SearchHit};
use crate::storage::ensure_parent;

/// File holding the collection inside its directory
pub const COLLECTION_FILE: &str = "collection.bin";

/// Identity of a collection: its name and the (model, metric) it was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    pub model: String,
    pub metric: DistanceMetric,
}

/// One document to write.
#[derive(Debug, Clone)]
pub struct UpsertItem {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionStats {
    pub collection_name: String,
    pub total_documents: usize,
    pub embedding_model: String,
    /// `None` until the first vector has been stored
    pub embedding_dimension: Option<usize>,
    pub distance_metric: DistanceMetric,
    pub path: PathBuf,
}

pub struct VectorStore {
    spec: CollectionSpec,
    dir: PathBuf,
    file: VectorFile,
    index: VectorIndex,
    lock: FileLock,
}

impl VectorStore {
    /// Open the collection under `db_path`, creating it if absent.
    ///
    /// Fails with `ModelMismatch` when an existing collection was built with a
    /// different model or metric, and with `StorageUnavailable` when the
    /// directory cannot be created or another writer holds it.
    pub fn open(db_path: &Path, spec: CollectionSpec) -> Result<Self, SearchError> {
        validate_collection_name(&spec.name)?;
        if spec.model.trim().is_empty() {
            return Err(SearchError::InvalidInput("model name is empty".to_string()));
        }

        let dir = db_path.join(&spec.name);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SearchError::storage(&format!("create {}", dir.display()), e))?;
        let lock = FileLock::try_acquire(&dir)
            .map_err(|e| SearchError::storage(&format!("lock {}", dir.display()), e))?;

        let file = VectorFile::collection(dir.join(COLLECTION_FILE));
        let index = if file.exists() {
            let (header, entries) = file.read()?;
            if !header.model.eq_ignore_ascii_case(&spec.model) {
                return Err(SearchError::ModelMismatch(format!(
                    "collection '{}' was built with model '{}', not '{}'",
                    spec.name, header.model, spec.model
                )));
            }
            if header.metric != spec.metric {
                return Err(SearchError::ModelMismatch(format!(
                    "collection '{}' uses {} distance, not {}",
                    spec.name, header.metric, spec.metric
                )));
            }

            let mut index = VectorIndex::with_capacity(header.metric, header.dimensions, entries.len());
            index
                .bulk_load(entries)
                .map_err(|e| SearchError::Corrupt(e.to_string()))?;
            log::info!(
                "Opened collection '{}' with {} documents",
                spec.name,
                index.len()
            );
            index
        } else {
            let index = VectorIndex::new(spec.metric, None);
            file.write(&spec.model, &index)
                .map_err(|e| SearchError::storage("write collection", e))?;
            log::info!("Created collection '{}' at {}", spec.name, dir.display());
            index
        };

        Ok(Self {
            spec,
            dir,
            file,
            index,
            lock,
        })
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.index.dimensions()
    }

    pub fn count(&self) -> usize {
        self.index.len()
    }

    /// Insert or overwrite one document.
    pub fn upsert(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        text: &str,
        metadata: Metadata,
    ) -> Result<(), SearchError> {
        let mut undo = Undo::default();
        self.index.insert(
            id.to_string(),
            IndexEntry {
                vector,
                text: text.to_string(),
                metadata,
            },
            &mut undo,
        )?;
        self.commit(undo)
    }

    /// Insert or overwrite many documents with a single write.
    ///
    /// Invalid items are reported in the outcome and the valid ones are kept.
    /// If the write fails nothing from this batch remains.
    pub fn upsert_batch(&mut self, items: Vec<UpsertItem>) -> Result<BatchOutcome, SearchError> {
        let mut outcome = BatchOutcome::default();
        let mut undo = Undo::default();
        let mut seen = HashSet::new();

        for (position, item) in items.into_iter().enumerate() {
            let key = if item.id.trim().is_empty() {
                format!("#{}", position)
            } else {
                item.id.clone()
            };
            let entry = IndexEntry {
                vector: item.vector,
                text: item.text,
                metadata: item.metadata,
            };
            match self.index.insert(item.id, entry, &mut undo) {
                Ok(()) => {
                    if seen.insert(key.clone()) {
                        outcome.stored.push(key);
                    }
                }
                Err(e) => {
                    log::debug!("Rejected document {}: {}", key, e);
                    outcome.fail(key, e.to_string());
                }
            }
        }

        self.commit(undo)?;
        Ok(outcome)
    }

    /// Rank documents by distance to `vector`, best first.
    pub fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if limit == 0 {
            return Err(SearchError::InvalidInput("limit must be at least 1".to_string()));
        }
        let limit = limit.min(self.index.len());
        Ok(self.index.search(vector, limit, filter)?)
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.index.get(id).map(|entry| Document {
            id: id.to_string(),
            text: entry.text.clone(),
            metadata: entry.metadata.clone(),
        })
    }

    pub fn get_vector(&self, id: &str) -> Option<&[f32]> {
        self.index.get(id).map(|entry| entry.vector.as_slice())
    }

    /// Delete one document. Deleting a missing id succeeds and returns `false`.
    pub fn delete(&mut self, id: &str) -> Result<bool, SearchError> {
        let mut undo = Undo::default();
        let removed = self.index.remove(id, &mut undo);
        self.commit(undo)?;
        Ok(removed)
    }

    /// Delete many documents with a single write, returning how many existed.
    pub fn delete_batch(&mut self, ids: &[String]) -> Result<usize, SearchError> {
        let mut undo = Undo::default();
        let removed = ids
            .iter()
            .filter(|id| self.index.remove(id, &mut undo))
            .count();
        self.commit(undo)?;
        Ok(removed)
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            collection_name: self.spec.name.clone(),
            total_documents: self.index.len(),
            embedding_model: self.spec.model.clone(),
            embedding_dimension: self.index.dimensions(),
            distance_metric: self.spec.metric,
            path: self.dir.clone(),
        }
    }

    /// Write every document to a self-contained export file.
    pub fn export(&self, path: &Path) -> Result<usize, SearchError> {
        ensure_parent(path).map_err(|e| SearchError::storage("create export directory", e))?;
        if self.index.is_empty() {
            log::warn!("Exporting empty collection '{}'", self.spec.name);
        }
        VectorFile::export(path.to_path_buf())
            .write(&self.spec.model, &self.index)
            .map_err(|e| SearchError::storage("write export", e))?;
        log::info!(
            "Exported {} documents from '{}' to {}",
            self.index.len(),
            self.spec.name,
            path.display()
        );
        Ok(self.index.len())
    }

    /// Upsert every record of an export file, returning the record count.
    ///
    /// A model or dimension disagreement, or any invalid record, rejects the
    /// whole file before the collection changes.
    pub fn import(&mut self, path: &Path) -> Result<usize, SearchError> {
        let (header, entries) = VectorFile::export(path.to_path_buf()).read()?;

        if !header.model.eq_ignore_ascii_case(&self.spec.model) {
            return Err(SearchError::ModelMismatch(format!(
                "export was built with model '{}', collection uses '{}'",
                header.model, self.spec.model
            )));
        }
        if let (Some(expected), Some(got)) = (self.index.dimensions(), header.dimensions) {
            if expected != got {
                return Err(SearchError::DimensionMismatch { expected, got });
            }
        }
        if header.metric != self.spec.metric {
            log::debug!(
                "Importing {} vectors into a {} collection",
                header.metric,
                self.spec.metric
            );
        }

        let count = entries.len();
        let mut undo = Undo::default();
        for (id, entry) in entries {
            if let Err(e) = self.index.insert(id, entry, &mut undo) {
                self.index.rollback(undo);
                return Err(e.into());
            }
        }
        self.commit(undo)?;

        log::info!(
            "Imported {} documents into '{}' from {}",
            count,
            self.spec.name,
            path.display()
        );
        Ok(count)
    }

    /// Remove every document, keeping model, metric and dimension.
    pub fn clear(&mut self) -> Result<(), SearchError> {
        let previous = self.index.take_all();
        if let Err(e) = self.persist() {
            self.index.restore_all(previous);
            return Err(e);
        }
        log::info!("Cleared collection '{}'", self.spec.name);
        Ok(())
    }

    /// Delete the collection directory and everything in it.
    pub fn drop_collection(self) -> Result<(), SearchError> {
        let Self { spec, dir, lock, .. } = self;
        std::fs::remove_dir_all(&dir)
            .map_err(|e| SearchError::storage(&format!("remove {}", dir.display()), e))?;
        drop(lock);
        log::info!("Dropped collection '{}'", spec.name);
        Ok(())
    }

    fn persist(&self) -> Result<(), SearchError> {
        self.file
            .write(&self.spec.model, &self.index)
            .map_err(|e| SearchError::storage("write collection", e))
    }

    /// Persist the writes recorded in `undo`, reverting them if that fails.
    fn commit(&mut self, undo: Undo) -> Result<(), SearchError> {
        if undo.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.persist() {
            log::error!("Rolling back write to '{}': {}", self.spec.name, e);
            self.index.rollback(undo);
            return Err(e);
        }
        Ok(())
    }
}

fn validate_collection_name(name: &str) -> Result<(), SearchError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\'])
        || trimmed != name
    {
        return Err(SearchError::InvalidInput(format!(
            "invalid collection name '{}'",
            name
        )));
    }
    Ok(())
}
