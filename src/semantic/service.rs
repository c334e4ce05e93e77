//! Document-level search API over an embedding generator and a vector store.
//!
//! - Embeds texts on write and queries on read
//! - Turns loosely-shaped JSON records into documents for batch writes
//! - Thread-safe: reads share the store, writes take it exclusively

use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::config::SearchConfig;
use crate::semantic::embeddings::{EmbeddingGenerator, ModelCache};
use crate::semantic::errors::SearchError;
use crate::semantic::store::{CollectionSpec, CollectionStats, UpsertItem, VectorStore};
use crate::semantic::types::{
    BatchOutcome, Document, Metadata, MetadataFilter, MetadataValue, SearchHit,
};

/// Default number of results returned by `search`
pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub filters: Option<MetadataFilter>,
    pub include_distances: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            filters: None,
            include_distances: true,
        }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = (!filters.is_empty()).then_some(filters);
        self
    }
}

pub struct SemanticSearch {
    generator: EmbeddingGenerator,
    store: RwLock<VectorStore>,
}

impl SemanticSearch {
    pub fn new(generator: EmbeddingGenerator, store: VectorStore) -> Self {
        Self {
            generator,
            store: RwLock::new(store),
        }
    }

    /// Open the configured collection. The model itself loads on first use.
    pub fn open(config: &SearchConfig, cache: Arc<ModelCache>) -> Result<Self, SearchError> {
        let spec = CollectionSpec {
            name: config.collection.clone(),
            model: config.model.clone(),
            metric: config.distance_metric,
        };
        let store = VectorStore::open(&config.db_path, spec)?;
        let generator =
            EmbeddingGenerator::new(&config.model, cache).with_batch_size(config.embed_batch_size);
        Ok(Self::new(generator, store))
    }

    pub fn model_name(&self) -> &str {
        self.generator.model_name()
    }

    /// Embed `text` and store it under `doc_id`, replacing any previous version.
    pub fn store(
        &self,
        doc_id: &str,
        text: &str,
        metadata: Option<Metadata>,
    ) -> Result<(), SearchError> {
        if doc_id.trim().is_empty() {
            return Err(SearchError::InvalidInput("document id is empty".to_string()));
        }
        let vector = self.generator.generate(text)?;
        self.write()?
            .upsert(doc_id, vector, text, metadata.unwrap_or_default())
    }

    /// Store many JSON records.
    ///
    /// The id comes from `id_field` (string or number) and the text from
    /// `text_field`. Records missing either, or with blank text, are reported
    /// as failures. With no `metadata_fields` every other field becomes
    /// metadata; otherwise only the named fields do.
    pub fn store_batch(
        &self,
        documents: &[Value],
        id_field: &str,
        text_field: &str,
        metadata_fields: Option<&[&str]>,
    ) -> Result<BatchOutcome, SearchError> {
        let mut outcome = BatchOutcome::default();
        let mut pending: Vec<(String, String, Metadata)> = Vec::with_capacity(documents.len());

        for (position, document) in documents.iter().enumerate() {
            let Some(fields) = document.as_object() else {
                outcome.fail(format!("#{}", position), "record is not a JSON object");
                continue;
            };

            let id = match fields.get(id_field) {
                Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    outcome.fail(
                        format!("#{}", position),
                        format!("missing id field '{}'", id_field),
                    );
                    continue;
                }
            };

            let text = match fields.get(text_field) {
                Some(Value::String(s)) => s.clone(),
                Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
                _ => {
                    outcome.fail(id, format!("missing text field '{}'", text_field));
                    continue;
                }
            };
            if text.trim().is_empty() {
                outcome.fail(id, "text is empty");
                continue;
            }

            let metadata: Metadata = match metadata_fields {
                None => fields
                    .iter()
                    .filter(|(key, _)| key.as_str() != id_field && key.as_str() != text_field)
                    .map(|(key, value)| (key.clone(), MetadataValue::from_json(value)))
                    .collect(),
                Some(names) => names
                    .iter()
                    .filter_map(|name| {
                        fields
                            .get(*name)
                            .map(|value| (name.to_string(), MetadataValue::from_json(value)))
                    })
                    .collect(),
            };

            pending.push((id, text, metadata));
        }

        if pending.is_empty() {
            return Ok(outcome);
        }

        let texts: Vec<String> = pending.iter().map(|(_, text, _)| text.clone()).collect();
        let vectors = self.generator.generate_batch(&texts)?;

        let items = pending
            .into_iter()
            .zip(vectors)
            .map(|((id, text, metadata), vector)| UpsertItem {
                id,
                vector,
                text,
                metadata,
            })
            .collect();

        let written = self.write()?.upsert_batch(items)?;
        outcome.stored = written.stored;
        outcome.failed.extend(written.failed);

        log::debug!(
            "Stored {} of {} documents ({} failed)",
            outcome.stored_count(),
            documents.len(),
            outcome.failed_count()
        );
        Ok(outcome)
    }

    /// Find the documents closest in meaning to `query`, best first.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchHit>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("query must not be empty".to_string()));
        }
        if options.limit == 0 {
            return Err(SearchError::InvalidInput("limit must be at least 1".to_string()));
        }
        if self.read()?.count() == 0 {
            return Ok(Vec::new());
        }

        let vector = self.generator.generate(query)?;
        let mut hits = self
            .read()?
            .query(&vector, options.limit, options.filters.as_ref())?;

        if !options.include_distances {
            for hit in &mut hits {
                hit.distance = None;
            }
        }
        Ok(hits)
    }

    pub fn get(&self, doc_id: &str) -> Result<Option<Document>, SearchError> {
        Ok(self.read()?.get(doc_id))
    }

    pub fn get_vector(&self, doc_id: &str) -> Result<Option<Vec<f32>>, SearchError> {
        Ok(self.read()?.get_vector(doc_id).map(<[f32]>::to_vec))
    }

    pub fn delete(&self, doc_id: &str) -> Result<bool, SearchError> {
        self.write()?.delete(doc_id)
    }

    pub fn delete_batch(&self, doc_ids: &[String]) -> Result<usize, SearchError> {
        self.write()?.delete_batch(doc_ids)
    }

    pub fn count(&self) -> Result<usize, SearchError> {
        Ok(self.read()?.count())
    }

    /// Collection statistics. An empty collection reports the model's dimension.
    pub fn stats(&self) -> Result<CollectionStats, SearchError> {
        let mut stats = self.read()?.stats();
        if stats.embedding_dimension.is_none() {
            match self.generator.dimensions() {
                Ok(dimensions) => stats.embedding_dimension = Some(dimensions),
                Err(e) => log::debug!("Model dimension unavailable: {}", e),
            }
        }
        Ok(stats)
    }

    pub fn clear(&self) -> Result<(), SearchError> {
        self.write()?.clear()
    }

    pub fn export(&self, path: &Path) -> Result<usize, SearchError> {
        self.read()?.export(path)
    }

    pub fn import(&self, path: &Path) -> Result<usize, SearchError> {
        self.write()?.import(path)
    }

    /// Remove the collection from disk.
    pub fn drop_collection(self) -> Result<(), SearchError> {
        self.store
            .into_inner()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))?
            .drop_collection()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, VectorStore>, SearchError> {
        self.store
            .read()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, VectorStore>, SearchError> {
        self.store
            .write()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::index::DistanceMetric;
    use crate::semantic::testing::hashing_cache;
    use serde_json::json;

    fn open(dir: &Path) -> SemanticSearch {
        let spec = CollectionSpec {
            name: "test".to_string(),
            model: "hash".to_string(),
            metric: DistanceMetric::Cosine,
        };
        let store = VectorStore::open(dir, spec).unwrap();
        SemanticSearch::new(EmbeddingGenerator::new("hash", hashing_cache(64)), store)
    }

    #[test]
    fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());

        let mut metadata = Metadata::new();
        metadata.insert("browser".into(), "chrome".into());
        search.store("doc", "rust ownership guide", Some(metadata.clone())).unwrap();

        let doc = search.get("doc").unwrap().unwrap();
        assert_eq!(doc.text, "rust ownership guide");
        assert_eq!(doc.metadata, metadata);
        assert!(search.get("missing").unwrap().is_none());

        assert!(matches!(
            search.store("doc", "   ", None),
            Err(SearchError::InvalidInput(_))
        ));
        assert!(matches!(search.store("", "x", None), Err(SearchError::InvalidInput(_))));
    }

    #[test]
    fn test_store_batch_field_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());

        let docs = vec![
            json!({"id": "a", "body": "first text", "year": 2020, "tags": ["x", "y"], "note": null}),
            json!({"id": 7, "body": "numeric id"}),
            json!({"body": "no id"}),
            json!({"id": "blank", "body": "  "}),
            json!({"id": "no-text"}),
            json!("not an object"),
        ];

        let outcome = search.store_batch(&docs, "id", "body", None).unwrap();
        assert_eq!(outcome.stored, vec!["a".to_string(), "7".to_string()]);
        let failed: Vec<&str> = outcome.failed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(failed, vec!["#2", "blank", "no-text", "#5"]);

        let a = search.get("a").unwrap().unwrap();
        assert_eq!(a.metadata.get("year"), Some(&MetadataValue::Int(2020)));
        assert_eq!(
            a.metadata.get("tags"),
            Some(&MetadataValue::Str("[\"x\",\"y\"]".into()))
        );
        assert_eq!(a.metadata.get("note"), Some(&MetadataValue::Str(String::new())));
        assert!(!a.metadata.contains_key("id"));
        assert!(!a.metadata.contains_key("body"));
    }

    #[test]
    fn test_store_batch_named_metadata_fields() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());

        let docs = vec![json!({"id": "a", "text": "hello", "keep": "yes", "drop": "no"})];
        search
            .store_batch(&docs, "id", "text", Some(&["keep", "absent"]))
            .unwrap();

        let a = search.get("a").unwrap().unwrap();
        assert_eq!(a.metadata.len(), 1);
        assert_eq!(a.metadata.get("keep"), Some(&MetadataValue::from("yes")));
    }

    #[test]
    fn test_search_validation() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());

        assert!(matches!(
            search.search("  ", &SearchOptions::default()),
            Err(SearchError::InvalidInput(_))
        ));
        assert!(matches!(
            search.search("x", &SearchOptions::default().with_limit(0)),
            Err(SearchError::InvalidInput(_))
        ));
        assert!(search.search("x", &SearchOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn test_search_with_filter_and_without_distances() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());
        let docs = vec![
            json!({"id": "1", "text": "python web framework", "lang": "python"}),
            json!({"id": "2", "text": "rust web framework", "lang": "rust"}),
            json!({"id": "3", "text": "gardening tips", "lang": "none"}),
        ];
        search.store_batch(&docs, "id", "text", None).unwrap();

        let options = SearchOptions::default().with_filters(MetadataFilter::new().eq("lang", "rust"));
        let hits = search.search("web framework", &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");
        assert!(hits[0].distance.is_some());

        let options = SearchOptions {
            include_distances: false,
            ..SearchOptions::default()
        };
        let hits = search.search("web framework", &options).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.distance.is_none()));
        assert_eq!(hits[2].id, "3");
    }

    #[test]
    fn test_stats_falls_back_to_model_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());

        let stats = search.stats().unwrap();
        assert_eq!(stats.total_documents, 0);
        assert_eq!(stats.embedding_dimension, Some(64));
        assert_eq!(stats.embedding_model, "hash");

        search.store("a", "text", None).unwrap();
        assert_eq!(search.stats().unwrap().total_documents, 1);
    }

    #[test]
    fn test_delete_and_clear_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path());
        for id in ["a", "b", "c"] {
            search.store(id, &format!("document {}", id), None).unwrap();
        }

        assert!(search.delete("a").unwrap());
        assert!(!search.delete("a").unwrap());
        assert_eq!(search.delete_batch(&["b".into(), "zz".into()]).unwrap(), 1);
        assert_eq!(search.count().unwrap(), 1);

        search.clear().unwrap();
        assert_eq!(search.count().unwrap(), 0);
    }
}
