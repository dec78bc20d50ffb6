//! Embedding engine: local ONNX model loader for the memory subsystem's
//! semantic-search side (spec §4.4 embedding indexer). Out of scope per
//! spec §1 ("semantic embedding model loader ... treated as interfaces") —
//! this is the thin seam the Scheduler's indexer calls through, with a
//! no-op default and a real `fastembed` backend behind the
//! `local-embeddings` feature.
//!
//! Blob encoding and cosine similarity are grounded in the teacher's
//! `pipeline/embedding_indexer.rs` (`embedding_to_blob`/`cosine_similarity`).

use std::hash::{Hash, Hasher};

pub trait EmbeddingEngine: Send + Sync {
    fn embed(&self, text: &str) -> Option<Vec<f32>>;
    fn model_name(&self) -> &str;
}

/// Used when the `local-embeddings` feature is off, or the model failed to
/// load. The indexer loop still runs — it just never has anything to embed.
pub struct NoopEmbeddingEngine;

impl EmbeddingEngine for NoopEmbeddingEngine {
    fn embed(&self, _text: &str) -> Option<Vec<f32>> {
        None
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

#[cfg(feature = "local-embeddings")]
pub struct FastEmbedEngine {
    inner: std::sync::Mutex<fastembed::TextEmbedding>,
    model_name: String,
}

#[cfg(feature = "local-embeddings")]
impl FastEmbedEngine {
    pub fn try_new() -> anyhow::Result<Self> {
        let inner = fastembed::TextEmbedding::try_new(Default::default())?;
        Ok(Self {
            inner: std::sync::Mutex::new(inner),
            model_name: "bge-small-en-v1.5".to_string(),
        })
    }
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingEngine for FastEmbedEngine {
    fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let mut model = self.inner.lock().ok()?;
        let mut embeddings = model.embed(vec![text.to_string()], None).ok()?;
        embeddings.pop()
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// f32 vector -> little-endian bytes, for the `embeddings.vector` BLOB column.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm = norm_a.sqrt() * norm_b.sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}

/// Change-detection hash for `embeddings.text_hash` — not a security
/// boundary, just lets the indexer skip re-embedding unchanged text.
pub fn text_hash(text: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vector = vec![0.1, -0.2, 0.3, 0.4];
        assert_eq!(blob_to_vector(&vector_to_blob(&vector)), vector);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }
}
