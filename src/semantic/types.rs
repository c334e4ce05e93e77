//! Document, metadata and result types shared by the store and the façade.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar metadata value. Metadata is used for filtering, never for similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Metadata attached to a document, ordered by key.
pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    /// Coerce an arbitrary JSON value into a scalar.
    ///
    /// Null becomes an empty string, nested arrays and objects become their
    /// compact JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetadataValue::Str(String::new()),
            Value::Bool(b) => MetadataValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => MetadataValue::Int(i),
                None => MetadataValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => MetadataValue::Str(s.clone()),
            other => MetadataValue::Str(other.to_string()),
        }
    }

    /// Parse a value typed on the command line: booleans and numbers are
    /// recognised, anything else is a string.
    pub fn parse_loose(raw: &str) -> Self {
        match raw {
            "true" => return MetadataValue::Bool(true),
            "false" => return MetadataValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = raw.parse::<i64>() {
            return MetadataValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return MetadataValue::Float(f);
            }
        }
        MetadataValue::Str(raw.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Equality used by filters. Integers and floats compare numerically.
    pub fn matches(&self, other: &MetadataValue) -> bool {
        match (self, other) {
            (MetadataValue::Int(a), MetadataValue::Float(b))
            | (MetadataValue::Float(b), MetadataValue::Int(a)) => (*a as f64) == *b,
            _ => self == other,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Int(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Conjunctive equality filter over document metadata.
///
/// A document matches when every condition key is present in its metadata
/// with an equal value. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataFilter {
    conditions: BTreeMap<String, MetadataValue>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            metadata
                .get(key)
                .map(|actual| actual.matches(expected))
                .unwrap_or(false)
        })
    }

    /// Build a filter from `key=value` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid filter '{}', expected key=value", pair))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("Invalid filter '{}', key is empty", pair));
            }
            filter = filter.eq(key, MetadataValue::parse_loose(value.trim()));
        }
        Ok(filter)
    }
}

/// A stored document as returned by point lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One ranked search result. Lower distance is better.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// An item that could not be written as part of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedItem {
    /// The document id, or `#<index>` when the record had no usable id
    pub key: String,
    pub reason: String,
}

/// Result of a batch write: which ids were stored and which items failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub stored: Vec<String>,
    pub failed: Vec<FailedItem>,
}

impl BatchOutcome {
    pub fn stored_count(&self) -> usize {
        self.stored.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub(crate) fn fail(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedItem {
            key: key.into(),
            reason: reason.into(),
        });
    }
}
