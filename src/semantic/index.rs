//! In-memory vector index with exact (brute-force) similarity search.
//!
//! Holds every document of a collection keyed by id. Distances are always
//! "lower is better" regardless of metric.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::semantic::types::{Metadata, MetadataFilter, MetadataValue, SearchHit};

/// Distance metric used to rank vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`
    #[default]
    Cosine,
    /// Squared euclidean distance
    L2,
    /// `1 - dot(a, b)`
    #[serde(alias = "inner_product")]
    Ip,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Ip => "ip",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            DistanceMetric::Cosine => 0,
            DistanceMetric::L2 => 1,
            DistanceMetric::Ip => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(DistanceMetric::Cosine),
            1 => Some(DistanceMetric::L2),
            2 => Some(DistanceMetric::Ip),
            _ => None,
        }
    }

    /// Distance between two vectors of equal length.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let norm_a = l2_norm(a);
                let norm_b = l2_norm(b);
                if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
                    return 1.0;
                }
                1.0 - dot(a, b) / (norm_a * norm_b)
            }
            DistanceMetric::L2 => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| (x - y) * (x - y))
                .sum(),
            DistanceMetric::Ip => 1.0 - dot(a, b),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "ip" | "inner_product" => Ok(DistanceMetric::Ip),
            other => Err(format!(
                "Unknown distance metric: {}. Supported: cosine, l2, ip",
                other
            )),
        }
    }
}

/// An entry in the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// Previous state of the ids touched by a write, used to undo it.
#[derive(Debug, Default)]
pub struct Undo {
    dimensions: Option<usize>,
    previous: Vec<(String, Option<IndexEntry>)>,
}

impl Undo {
    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

/// In-memory vector index for one collection.
pub struct VectorIndex {
    entries: HashMap<String, IndexEntry>,
    /// Established by the first insert and kept across `clear()`
    dimensions: Option<usize>,
    metric: DistanceMetric,
}

impl VectorIndex {
    pub fn new(metric: DistanceMetric, dimensions: Option<usize>) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
            metric,
        }
    }

    pub fn with_capacity(metric: DistanceMetric, dimensions: Option<usize>, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
            metric,
        }
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check that an entry could be inserted without modifying the index.
    pub fn validate(&self, id: &str, vector: &[f32]) -> Result<(), IndexError> {
        if id.trim().is_empty() {
            return Err(IndexError::EmptyId);
        }
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        if let Some(expected) = self.dimensions {
            if vector.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: vector.len(),
                });
            }
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteValue);
        }
        if self.metric == DistanceMetric::Cosine && l2_norm(vector) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }
        Ok(())
    }

    /// Metadata must survive a JSON round trip, so NaN and infinities are refused.
    pub fn validate_metadata(metadata: &Metadata) -> Result<(), IndexError> {
        for (key, value) in metadata {
            if let MetadataValue::Float(x) = value {
                if !x.is_finite() {
                    return Err(IndexError::NonFiniteMetadata(key.clone()));
                }
            }
        }
        Ok(())
    }

    /// Insert or replace an entry, recording what it replaced in `undo`.
    pub fn insert(&mut self, id: String, entry: IndexEntry, undo: &mut Undo) -> Result<(), IndexError> {
        self.validate(&id, &entry.vector)?;
        Self::validate_metadata(&entry.metadata)?;

        if undo.previous.is_empty() {
            undo.dimensions = self.dimensions;
        }
        if self.dimensions.is_none() {
            self.dimensions = Some(entry.vector.len());
        }

        let previous = self.entries.insert(id.clone(), entry);
        undo.previous.push((id, previous));
        Ok(())
    }

    /// Remove an entry, recording it in `undo`.
    /// Returns `false` when the id was not present.
    pub fn remove(&mut self, id: &str, undo: &mut Undo) -> bool {
        let Some(removed) = self.entries.remove(id) else {
            return false;
        };
        if undo.previous.is_empty() {
            undo.dimensions = self.dimensions;
        }
        undo.previous.push((id.to_string(), Some(removed)));
        true
    }

    /// Revert the writes recorded in `undo`, newest first.
    pub fn rollback(&mut self, undo: Undo) {
        if undo.previous.is_empty() {
            return;
        }
        for (id, previous) in undo.previous.into_iter().rev() {
            match previous {
                Some(entry) => {
                    self.entries.insert(id, entry);
                }
                None => {
                    self.entries.remove(&id);
                }
            }
        }
        self.dimensions = undo.dimensions;
    }

    /// Bulk load entries into the index.
    /// Used when loading from storage.
    pub fn bulk_load(&mut self, entries: Vec<(String, IndexEntry)>) -> Result<(), IndexError> {
        for (id, entry) in entries {
            self.validate(&id, &entry.vector)?;
            Self::validate_metadata(&entry.metadata)?;
            if self.dimensions.is_none() {
                self.dimensions = Some(entry.vector.len());
            }
            self.entries.insert(id, entry);
        }
        Ok(())
    }

    /// Remove every entry, returning them so the caller can restore on failure.
    pub fn take_all(&mut self) -> HashMap<String, IndexEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn restore_all(&mut self, entries: HashMap<String, IndexEntry>) {
        self.entries = entries;
    }

    /// Rank entries by distance to `query`, best first.
    ///
    /// Entries not matching `filter` are excluded before ranking, so `limit`
    /// always counts matching documents.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let Some(expected) = self.dimensions else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: query.len(),
            });
        }
        if query.iter().any(|x| !x.is_finite()) {
            return Err(IndexError::NonFiniteValue);
        }

        let mut scored: Vec<(&String, &IndexEntry, f32)> = self
            .entries
            .iter()
            .filter(|(_, entry)| filter.map(|f| f.matches(&entry.metadata)).unwrap_or(true))
            .map(|(id, entry)| (id, entry, self.metric.distance(query, &entry.vector)))
            .collect();

        // Ties break on id so results are stable between runs
        scored.sort_by(|a, b| {
            a.2.partial_cmp(&b.2)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(id, entry, distance)| SearchHit {
                id: id.clone(),
                text: entry.text.clone(),
                metadata: entry.metadata.clone(),
                distance: Some(distance),
            })
            .collect())
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store a zero-norm vector under cosine distance")]
    ZeroNormVector,

    #[error("Vector contains NaN or infinite values")]
    NonFiniteValue,

    #[error("Metadata field '{0}' is NaN or infinite")]
    NonFiniteMetadata(String),

    #[error("Vector is empty")]
    EmptyVector,

    #[error("Document id is empty")]
    EmptyId,
}
