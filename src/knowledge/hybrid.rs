//! 하이브리드 검색 결과 통합 - RRF (Reciprocal Rank Fusion)
//!
//! 키워드 / Dense / 페이지 인덱스 결과 목록을 순위 기반으로 하나로 합칩니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// RRF 상수 k (모든 소스 공통)
pub const RRF_K: f64 = 60.0;

/// 페이지 인덱스 직접 조회 가중치 (정확 일치는 더 강한 근거)
pub const PAGE_INDEX_WEIGHT: f64 = 2.0;

// ============================================================================
// Types
// ============================================================================

/// 검색 결과 출처
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    /// Dense(임베딩) 검색
    Dense,
    /// 키워드(FTS5) 검색
    Keyword,
    /// 페이지 인덱스 직접 조회
    PageIndex,
    /// RRF 통합 결과
    Hybrid,
}

impl HitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitSource::Dense => "dense",
            HitSource::Keyword => "keyword",
            HitSource::PageIndex => "page_index",
            HitSource::Hybrid => "hybrid",
        }
    }

    /// RRF 가중치
    pub fn fusion_weight(&self) -> f64 {
        match self {
            HitSource::PageIndex => PAGE_INDEX_WEIGHT,
            _ => 1.0,
        }
    }
}

impl fmt::Display for HitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 결과 메타데이터. `rank`/`score`는 만들어진 목록 안에서만 의미가 있음
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HitMeta {
    pub rank: usize,
    pub score: f64,
    /// 통합 방식 (`"rrf"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fusion: Option<String>,
}

/// 검색 결과 한 건
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// 페이지 저장소 인덱스 (문자열)
    pub page_id: String,
    pub snippet: String,
    pub source: HitSource,
    pub meta: HitMeta,
}

impl Hit {
    pub fn new(page_index: usize, snippet: impl Into<String>, source: HitSource, rank: usize, score: f64) -> Self {
        Self {
            page_id: page_index.to_string(),
            snippet: snippet.into(),
            source,
            meta: HitMeta {
                rank,
                score,
                fusion: None,
            },
        }
    }

    /// `page_id`를 저장소 인덱스로 해석
    pub fn page_index(&self) -> Option<usize> {
        self.page_id.parse().ok()
    }
}

// ============================================================================
// Reciprocal Rank Fusion
// ============================================================================

/// RRF 통합
///
/// 각 목록의 0-based 순위 `r` 결과는 `weight / (k + r + 1)`을 기여합니다.
/// 키워드와 Dense는 가중치 1.0, 페이지 인덱스는 2.0입니다.
/// 같은 `page_id`의 점수는 소스 간 합산됩니다.
///
/// 정렬: 통합 점수 내림차순. 동점은 처음 등장한 순서를 유지합니다
/// (키워드 → Dense → 페이지 인덱스, 각 목록은 순위 순).
pub fn reciprocal_rank_fusion(
    keyword_hits: &[Hit],
    dense_hits: &[Hit],
    page_index_hits: &[Hit],
    k: f64,
) -> Vec<Hit> {
    // page_id -> entries 위치
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut entries: Vec<(f64, &Hit)> = Vec::new();

    let sources = [
        (keyword_hits, HitSource::Keyword.fusion_weight()),
        (dense_hits, HitSource::Dense.fusion_weight()),
        (page_index_hits, HitSource::PageIndex.fusion_weight()),
    ];

    for (hits, weight) in sources {
        for (rank, hit) in hits.iter().enumerate() {
            if hit.page_id.is_empty() {
                continue;
            }

            let contribution = weight / (k + rank as f64 + 1.0);
            match positions.get(hit.page_id.as_str()) {
                Some(&pos) => entries[pos].0 += contribution,
                None => {
                    positions.insert(hit.page_id.as_str(), entries.len());
                    entries.push((contribution, hit));
                }
            }
        }
    }

    // 안정 정렬이므로 동점은 등장 순서 유지
    entries.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    entries
        .into_iter()
        .enumerate()
        .map(|(rank, (score, hit))| Hit {
            page_id: hit.page_id.clone(),
            snippet: hit.snippet.clone(),
            source: HitSource::Hybrid,
            meta: HitMeta {
                rank,
                score,
                fusion: Some("rrf".to_string()),
            },
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str], source: HitSource) -> Vec<Hit> {
        ids.iter()
            .enumerate()
            .map(|(rank, id)| Hit {
                page_id: id.to_string(),
                snippet: format!("snippet {}", id),
                source,
                meta: HitMeta {
                    rank,
                    score: 0.5,
                    fusion: None,
                },
            })
            .collect()
    }

    #[test]
    fn test_keyword_dense_overlap_order_and_scores() {
        let keyword = hits(&["A", "B"], HitSource::Keyword);
        let dense = hits(&["B", "C"], HitSource::Dense);

        let fused = reciprocal_rank_fusion(&keyword, &dense, &[], RRF_K);
        let ids: Vec<&str> = fused.iter().map(|h| h.page_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);

        // B: 키워드 rank 1 + Dense rank 0
        assert!((fused[0].meta.score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        // A: 키워드 rank 0
        assert!((fused[1].meta.score - 1.0 / 61.0).abs() < 1e-12);
        // C: Dense rank 1
        assert!((fused[2].meta.score - 1.0 / 62.0).abs() < 1e-12);

        for (i, hit) in fused.iter().enumerate() {
            assert_eq!(hit.meta.rank, i);
            assert_eq!(hit.source, HitSource::Hybrid);
            assert_eq!(hit.meta.fusion.as_deref(), Some("rrf"));
        }
    }

    #[test]
    fn test_tie_prefers_keyword_source() {
        // 같은 순위 → 같은 점수 → 키워드가 먼저
        let keyword = hits(&["A"], HitSource::Keyword);
        let dense = hits(&["C"], HitSource::Dense);

        let fused = reciprocal_rank_fusion(&keyword, &dense, &[], RRF_K);
        assert_eq!(fused[0].page_id, "A");
        assert_eq!(fused[1].page_id, "C");
        assert_eq!(fused[0].meta.score, fused[1].meta.score);
    }

    #[test]
    fn test_page_index_weight_doubles() {
        let dense = hits(&["X"], HitSource::Dense);
        let exact = hits(&["Y"], HitSource::PageIndex);

        let fused = reciprocal_rank_fusion(&[], &dense, &exact, RRF_K);
        assert_eq!(fused[0].page_id, "Y");
        assert!((fused[0].meta.score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_snippet_from_first_seen() {
        let keyword = vec![Hit::new(3, "from keyword", HitSource::Keyword, 0, 1.0)];
        let dense = vec![Hit::new(3, "from dense", HitSource::Dense, 0, 0.9)];

        let fused = reciprocal_rank_fusion(&keyword, &dense, &[], RRF_K);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].snippet, "from keyword");
        assert_eq!(fused[0].page_index(), Some(3));
    }

    #[test]
    fn test_empty_inputs_and_blank_ids() {
        assert!(reciprocal_rank_fusion(&[], &[], &[], RRF_K).is_empty());

        let blank = hits(&[""], HitSource::Keyword);
        assert!(reciprocal_rank_fusion(&blank, &[], &[], RRF_K).is_empty());
    }

    #[test]
    fn test_hit_source_serde_names() {
        assert_eq!(serde_json::to_string(&HitSource::PageIndex).unwrap(), "\"page_index\"");
        assert_eq!(HitSource::Hybrid.to_string(), "hybrid");
    }
}
