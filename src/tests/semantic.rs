//! Search flows across the façade, the store and the file formats.

use std::path::Path;

use serde_json::json;

use crate::semantic::testing::hashing_cache;
use crate::semantic::{
    CollectionSpec, DistanceMetric, EmbeddingGenerator, MetadataFilter, MetadataValue,
    ModelCache, SearchError, SearchOptions, SemanticSearch, VectorStore,
};

fn spec(name: &str, metric: DistanceMetric) -> CollectionSpec {
    CollectionSpec {
        name: name.to_string(),
        model: "hash".to_string(),
        metric,
    }
}

fn open(db_path: &Path, name: &str, metric: DistanceMetric) -> SemanticSearch {
    let store = VectorStore::open(db_path, spec(name, metric)).unwrap();
    SemanticSearch::new(EmbeddingGenerator::new("hash", hashing_cache(64)), store)
}

fn seed(search: &SemanticSearch) {
    let docs = vec![
        json!({"id": "py", "text": "python web framework", "category": "code"}),
        json!({"id": "rs", "text": "rust lang", "category": "code"}),
        json!({"id": "gd", "text": "gardening tips", "category": "home"}),
    ];
    let outcome = search.store_batch(&docs, "id", "text", Some(&["category"])).unwrap();
    assert!(outcome.is_complete());
}

#[test]
fn test_store_batch_then_search_single_document() {
    let dir = tempfile::tempdir().unwrap();
    let search = open(dir.path(), "docs", DistanceMetric::Cosine);

    let docs = vec![json!({"id": "d1", "text": "cats are mammals", "category": "bio"})];
    let outcome = search
        .store_batch(&docs, "id", "text", Some(&["category"]))
        .unwrap();
    assert_eq!(outcome.stored, vec!["d1".to_string()]);

    let hits = search
        .search("feline animals", &SearchOptions::default().with_limit(1))
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "d1");
    assert_eq!(
        hits[0].metadata.get("category"),
        Some(&MetadataValue::from("bio"))
    );
}

#[test]
fn test_ranking_is_non_decreasing() {
    for metric in [DistanceMetric::Cosine, DistanceMetric::L2] {
        let dir = tempfile::tempdir().unwrap();
        let search = open(dir.path(), "ranked", metric);
        seed(&search);

        let hits = search
            .search("python web", &SearchOptions::default())
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, "py", "{metric}");
        let distances: Vec<f32> = hits.iter().map(|h| h.distance.unwrap()).collect();
        assert!(
            distances.windows(2).all(|w| w[0] <= w[1]),
            "{metric}: {distances:?}"
        );
    }
}

#[test]
fn test_filters_apply_before_ranking() {
    let dir = tempfile::tempdir().unwrap();
    let search = open(dir.path(), "filtered", DistanceMetric::Cosine);
    seed(&search);

    let options = SearchOptions::default().with_filters(MetadataFilter::new().eq("category", "home"));
    let hits = search.search("python web", &options).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "gd");

    let options = SearchOptions::default().with_filters(MetadataFilter::new().eq("category", "none"));
    assert!(search.search("python web", &options).unwrap().is_empty());

    let options = SearchOptions {
        include_distances: false,
        ..Default::default()
    };
    let hits = search.search("rust", &options).unwrap();
    assert!(hits.iter().all(|h| h.distance.is_none()));
}

#[test]
fn test_upsert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let search = open(dir.path(), "idem", DistanceMetric::Cosine);
    seed(&search);
    seed(&search);
    assert_eq!(search.count().unwrap(), 3);

    search.store("py", "python web framework", None).unwrap();
    assert_eq!(search.count().unwrap(), 3);
    assert!(search.get("py").unwrap().unwrap().metadata.is_empty());
}

#[test]
fn test_collection_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let search = open(dir.path(), "persist", DistanceMetric::Cosine);
        seed(&search);
        assert!(search.delete("gd").unwrap());
    }

    let search = open(dir.path(), "persist", DistanceMetric::Cosine);
    let stats = search.stats().unwrap();
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.embedding_dimension, Some(64));
    assert_eq!(stats.distance_metric, DistanceMetric::Cosine);
    assert_eq!(
        search.get("rs").unwrap().unwrap().text,
        "rust lang"
    );
}

#[test]
fn test_reopen_with_different_metric_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    {
        let search = open(dir.path(), "metric", DistanceMetric::Cosine);
        seed(&search);
    }
    let result = VectorStore::open(dir.path(), spec("metric", DistanceMetric::Ip));
    assert!(matches!(result, Err(SearchError::ModelMismatch(_))));
}

#[test]
fn test_export_import_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("exports/all.bvex");

    let source = open(&dir.path().join("a"), "source", DistanceMetric::Cosine);
    seed(&source);
    assert_eq!(source.export(&export_path).unwrap(), 3);

    let target = open(&dir.path().join("b"), "target", DistanceMetric::Cosine);
    assert_eq!(target.import(&export_path).unwrap(), 3);
    assert_eq!(target.count().unwrap(), 3);

    for id in ["py", "rs", "gd"] {
        let original = source.get(id).unwrap().unwrap();
        let imported = target.get(id).unwrap().unwrap();
        assert_eq!(original, imported);
    }

    // Vectors are compared through the stores directly
    drop(source);
    drop(target);
    let a = VectorStore::open(&dir.path().join("a"), spec("source", DistanceMetric::Cosine)).unwrap();
    let b = VectorStore::open(&dir.path().join("b"), spec("target", DistanceMetric::Cosine)).unwrap();
    for id in ["py", "rs", "gd"] {
        assert_eq!(a.get_vector(id), b.get_vector(id));
    }
}

#[test]
fn test_import_from_other_model_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let export_path = dir.path().join("hash.bvex");

    let source = open(&dir.path().join("a"), "source", DistanceMetric::Cosine);
    seed(&source);
    source.export(&export_path).unwrap();

    let store = VectorStore::open(
        &dir.path().join("b"),
        CollectionSpec {
            name: "other".to_string(),
            model: "other-model".to_string(),
            metric: DistanceMetric::Cosine,
        },
    )
    .unwrap();
    let target = SemanticSearch::new(EmbeddingGenerator::new("other-model", hashing_cache(64)), store);
    assert!(matches!(
        target.import(&export_path),
        Err(SearchError::ModelMismatch(_))
    ));
    assert_eq!(target.count().unwrap(), 0);
}

#[test]
fn test_drop_collection_removes_files() {
    let dir = tempfile::tempdir().unwrap();
    let search = open(dir.path(), "dropped", DistanceMetric::Cosine);
    seed(&search);
    let vector = search.get_vector("py").unwrap().unwrap();
    assert_eq!(vector.len(), 64);
    assert!(search.get_vector("missing").unwrap().is_none());

    let path = search.stats().unwrap().path;
    search.drop_collection().unwrap();
    assert!(!path.exists());

    // A fresh collection with the same name starts empty
    let search = open(dir.path(), "dropped", DistanceMetric::Cosine);
    assert_eq!(search.count().unwrap(), 0);
}

#[test]
fn test_clear_keeps_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let search = open(dir.path(), "cleared", DistanceMetric::Cosine);
    seed(&search);
    search.clear().unwrap();

    assert_eq!(search.count().unwrap(), 0);
    assert!(search.search("python", &SearchOptions::default()).unwrap().is_empty());
    assert_eq!(search.stats().unwrap().embedding_dimension, Some(64));

    // The same model keeps working after a clear
    seed(&search);
    assert_eq!(search.count().unwrap(), 3);
}

#[test]
fn test_search_on_empty_collection_does_not_load_model() {
    let dir = tempfile::tempdir().unwrap();
    let cache = std::sync::Arc::new(ModelCache::new(Box::new(|name| {
        Err(crate::semantic::embeddings::EmbeddingError::InitFailed(format!(
            "{name} unavailable"
        )))
    })));
    let store = VectorStore::open(dir.path(), spec("empty", DistanceMetric::Cosine)).unwrap();
    let search = SemanticSearch::new(EmbeddingGenerator::new("hash", cache), store);

    assert!(search.search("anything", &SearchOptions::default()).unwrap().is_empty());
    assert!(matches!(
        search.store("d", "text", None),
        Err(SearchError::Embedding(_))
    ));
}

#[test]
#[ignore = "requires model download"]
fn test_fastembed_semantic_match() {
    let dir = tempfile::tempdir().unwrap();
    let cache = std::sync::Arc::new(ModelCache::fastembed(
        dir.path().to_path_buf(),
        std::time::Duration::from_secs(600),
    ));
    let store = VectorStore::open(
        &dir.path().join("db"),
        CollectionSpec {
            name: "real".to_string(),
            model: crate::semantic::DEFAULT_MODEL.to_string(),
            metric: DistanceMetric::Cosine,
        },
    )
    .unwrap();
    let search = SemanticSearch::new(
        EmbeddingGenerator::new(crate::semantic::DEFAULT_MODEL, cache),
        store,
    );

    let docs = vec![
        json!({"id": "d1", "text": "cats are mammals"}),
        json!({"id": "d2", "text": "the stock market closed higher today"}),
        json!({"id": "d3", "text": "rust borrow checker explained"}),
    ];
    search.store_batch(&docs, "id", "text", None).unwrap();

    let hits = search
        .search("feline animals", &SearchOptions::default().with_limit(1))
        .unwrap();
    assert_eq!(hits[0].id, "d1");
    assert_eq!(search.stats().unwrap().embedding_dimension, Some(384));
}
