//! Offline embedder: hashed bag of lowercase word tokens, L2-normalized.
//!
//! No semantic knowledge, but texts sharing words land close together, which
//! is enough to run the index without a model server.
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::config::{Number, EPSILON};
use crate::error::{RagError, Result};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::EmbedderInit(
                "hashing embedder needs at least one dimension".into(),
            ));
        }
        Ok(Self { dimensions })
    }

    fn bucket(&self, token: &str) -> (usize, Number) {
        let digest = Sha256::digest(token.as_bytes());
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(buf);
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        ((hash % self.dimensions as u64) as usize, sign)
    }

    fn embed_text(&self, text: &str) -> Vec<Number> {
        let mut vector = vec![0.0; self.dimensions];
        let lower = text.to_lowercase();
        for token in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.chars().count() > 1)
        {
            let (slot, sign) = self.bucket(token);
            vector[slot] += sign;
        }
        normalize_vector(&mut vector);
        vector
    }
}

fn normalize_vector(vector: &mut [Number]) {
    let magnitude: Number = vector.iter().map(|&x| x * x).sum::<Number>().sqrt();
    if magnitude > EPSILON {
        for x in vector.iter_mut() {
            *x /= magnitude;
        }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<Number>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}
