//! Default embedding producer.
//!
//! The production embedding model is a plug; this default derives a
//! deterministic pseudo-random vector from the SHA-256 of the text, which
//! keeps the full index/search path exercisable without model weights.
//! Identical texts always map to identical vectors.

use quill_types::Embedder;
use sha2::{Digest, Sha256};

/// Deterministic hash-based embedder of a fixed dimension.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let seed = Sha256::digest(text.as_bytes());
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;

        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(seed);
            hasher.update(counter.to_le_bytes());
            let block = hasher.finalize();

            for chunk in block.chunks_exact(4) {
                if out.len() == self.dimension {
                    break;
                }
                let word = u32::from_le_bytes(chunk.try_into().expect("4-byte chunk"));
                // Map to [-1, 1]
                out.push((word as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            counter += 1;
        }

        out
    }
}
