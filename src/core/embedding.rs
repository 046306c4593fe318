//! Deterministic hashing-trick embedding (C4), substituting for a
//! sentence-transformer model that has no practical offline-inference story in
//! this process (design note recorded in DESIGN.md).
//!
//! Each token is hashed into one of `dim` buckets with a sign derived from a
//! second hash, following the standard feature-hashing construction (Weinberger
//! et al.); the resulting vector is L2-normalized so cosine similarity behaves
//! the same way it would against a learned embedding.

use fnv::FnvHasher;
use std::hash::Hasher;

const TOKEN_SEED: u64 = 0x9e3779b97f4a7c15;
const SIGN_SEED: u64 = 0xc2b2ae3d27d4eb4f;

fn tokenize(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|tok| !tok.is_empty())
        .collect()
}

fn hash_with_seed(token: &str, seed: u64) -> u64 {
    let mut hasher = FnvHasher::with_key(seed);
    hasher.write(token.as_bytes());
    hasher.finish()
}

/// Embeds `text` into a `dim`-dimensional, L2-normalized vector via the
/// hashing trick. Deterministic: same text and dim always produce the same
/// vector, so it is safe to call repeatedly without caching.
pub fn embed(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dim];
    for token in tokenize(text) {
        let bucket = (hash_with_seed(token, TOKEN_SEED) as usize) % dim;
        let sign = if hash_with_seed(token, SIGN_SEED) & 1 == 0 {
            1.0
        } else {
            -1.0
        };
        vector[bucket] += sign;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

/// Cosine similarity between two equal-length vectors, in [-1, 1]. Returns 0.0
/// if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let a = embed("will bitcoin reach 100000 by 2025", 256);
        let b = embed("will bitcoin reach 100000 by 2025", 256);
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_is_unit_norm() {
        let v = embed("fed hikes rates in march", 128);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn identical_text_has_cosine_similarity_one() {
        let v = embed("bitcoin price target", 64);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn unrelated_text_has_lower_similarity_than_identical() {
        let a = embed("bitcoin reaches one hundred thousand dollars", 256);
        let b = embed("congress passes the federal budget bill", 256);
        let c = embed("bitcoin reaches one hundred thousand dollars", 256);
        assert!(cosine_similarity(&a, &b) < cosine_similarity(&a, &c));
    }
}
