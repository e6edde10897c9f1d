//! 해싱 임베딩 - 외부 서비스 없이 동작하는 결정적 임베딩
//!
//! 소문자 토큰을 SHA-256으로 해싱해 `dimension`개 버킷에 부호와 함께 누적한 뒤
//! L2 정규화합니다. 같은 입력은 항상 같은 벡터를 만듭니다.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

use super::Embedder;

/// 기본 차원
pub const DEFAULT_HASHING_DIMENSION: usize = 384;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// 단일 텍스트 임베딩 (빈 텍스트는 영벡터)
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn encode_corpus(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = HashingEmbedder::new(64);
        assert_eq!(embedder.embed("Hello world"), embedder.embed("hello, WORLD"));
    }

    #[test]
    fn test_empty_is_zero() {
        let embedder = HashingEmbedder::new(16);
        assert!(embedder.embed("   ").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_unit_norm() {
        let embedder = HashingEmbedder::new(128);
        let v = embedder.embed("the quick brown fox");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_tokens_are_closer() {
        let embedder = HashingEmbedder::default();
        let query = embedder.embed("capital of France");
        let paris = embedder.embed("Paris is the capital and largest city of France.");
        let python = embedder.embed("Python is a popular programming language.");

        assert!(cosine_similarity(&query, &paris) > cosine_similarity(&query, &python));
    }
}
