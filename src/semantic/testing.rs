//! Deterministic in-process embedder for tests.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::semantic::embeddings::{Embedder, EmbeddingError, ModelCache};

/// Bag-of-words embedder: each lowercase token bumps one hashed bucket, then
/// the vector is L2-normalised. Texts sharing words end up close together.
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            vector[bucket(token, self.dimensions)] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
            return vector;
        }
        vector.iter().map(|x| x / norm).collect()
    }
}

impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// First eight bytes of the token's sha256, little-endian, modulo `dimensions`.
pub fn bucket(token: &str, dimensions: usize) -> usize {
    let digest = Sha256::digest(token.to_lowercase().as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % dimensions as u64) as usize
}

/// A model cache whose loader always returns a `HashingEmbedder`.
pub fn hashing_cache(dimensions: usize) -> Arc<ModelCache> {
    Arc::new(ModelCache::new(Box::new(move |_| {
        Ok(Arc::new(HashingEmbedder::new(dimensions)) as Arc<dyn Embedder>)
    })))
}
