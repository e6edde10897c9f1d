//! 페이지 인덱스 직접 조회
//!
//! 계획 단계에서 지목한 페이지 번호를 그대로 결과로 바꿉니다.
//! 별도 인덱스가 없으므로 build/update/clear는 아무 일도 하지 않습니다.

use std::sync::Arc;

use super::hybrid::{Hit, HitSource};
use super::page::PageStore;

pub struct PageIndexLookup {
    repository: Arc<dyn PageStore>,
}

impl PageIndexLookup {
    pub fn new(repository: Arc<dyn PageStore>) -> Self {
        Self { repository }
    }

    /// 존재하는 페이지만 순서대로 결과에 포함 (중복 제거)
    pub fn lookup(&self, indices: &[usize]) -> Vec<Hit> {
        let mut seen = std::collections::HashSet::new();
        let mut hits = Vec::new();

        for &index in indices {
            if !seen.insert(index) {
                continue;
            }

            match self.repository.get(index) {
                Ok(Some(page)) => {
                    let rank = hits.len();
                    hits.push(Hit::new(index, page.content, HitSource::PageIndex, rank, 1.0));
                }
                Ok(None) => tracing::debug!("Page {} does not exist, skipping", index),
                Err(e) => tracing::warn!("Page {} lookup failed: {}", index, e),
            }
        }

        hits
    }

    /// 문자열 질의를 페이지 번호로 해석. 숫자가 아닌 질의는 무시
    pub fn search(&self, queries: &[String]) -> Vec<Vec<Hit>> {
        let indices: Vec<usize> = queries
            .iter()
            .filter_map(|q| q.trim().parse().ok())
            .collect();
        vec![self.lookup(&indices)]
    }
}
