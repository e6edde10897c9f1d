//! Flat Inner-Product Index - 정확한 최근접 이웃 검색
//!
//! 행을 L2 정규화해 저장하므로 내적이 곧 코사인 유사도입니다.
//! 증분 삽입은 지원하지 않습니다. 행렬이 바뀌면 새로 만듭니다.

// ============================================================================
// FlatIndex
// ============================================================================

/// 정규화된 임베딩 행렬 위의 전수 내적 검색
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dimension: usize,
    /// 정규화된 행 (row-major, len = rows * dimension)
    rows: Vec<f32>,
}

impl FlatIndex {
    /// 임베딩 행렬로 인덱스 생성
    ///
    /// 모든 행은 같은 차원이어야 하며, 차원이 다른 행은 영벡터로 취급합니다.
    pub fn build(embeddings: &[Vec<f32>], dimension: usize) -> Self {
        let mut rows = Vec::with_capacity(embeddings.len() * dimension);

        for embedding in embeddings {
            if embedding.len() == dimension {
                rows.extend(normalized(embedding));
            } else {
                tracing::warn!(
                    "Embedding dimension mismatch ({} != {}), using zero row",
                    embedding.len(),
                    dimension
                );
                rows.extend(std::iter::repeat(0.0).take(dimension));
            }
        }

        Self { dimension, rows }
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.rows.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 상위 `top_k` (행 인덱스, 코사인 유사도)
    ///
    /// 점수 내림차순, 동점은 작은 행 인덱스 우선.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<(usize, f32)> {
        if top_k == 0 || self.is_empty() || query.len() != self.dimension {
            return vec![];
        }

        let query = normalized(query);

        let mut scored: Vec<(usize, f32)> = self
            .rows
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(i, row)| (i, dot(row, &query)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);
        scored
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 (-1.0 ~ 1.0). 길이가 다르거나 영벡터면 0.0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (norm_a * norm_b)
}

/// L2 정규화 사본. 영벡터는 그대로
fn normalized(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ============================================================================
// Tests
// ============================================================================
