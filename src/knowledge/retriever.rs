//! 검색기 묶음
//!
//! 세 가지 검색기(Dense / Keyword / 페이지 인덱스)를 닫힌 enum으로 다룹니다.
//! 리서치 루프와 엔진은 [`RetrieverSet`]을 통해 종류별 검색기를 찾습니다.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::dense::DenseIndex;
use super::hybrid::Hit;
use super::keyword::KeywordIndex;
use super::page::PageStore;
use super::page_index::PageIndexLookup;

// ============================================================================
// RetrieverKind
// ============================================================================

/// 검색기 종류. `bm25` / `vector`도 별칭으로 받음
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrieverKind {
    #[serde(alias = "vector")]
    Dense,
    #[serde(alias = "bm25")]
    Keyword,
    PageIndex,
}

impl RetrieverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrieverKind::Dense => "dense",
            RetrieverKind::Keyword => "keyword",
            RetrieverKind::PageIndex => "page_index",
        }
    }
}

impl fmt::Display for RetrieverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrieverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dense" | "vector" => Ok(RetrieverKind::Dense),
            "keyword" | "bm25" => Ok(RetrieverKind::Keyword),
            "page_index" => Ok(RetrieverKind::PageIndex),
            other => Err(Error::Config(format!("unknown retriever: {}", other))),
        }
    }
}

// ============================================================================
// Retriever
// ============================================================================

pub enum Retriever {
    Dense(DenseIndex),
    Keyword(KeywordIndex),
    PageIndex(PageIndexLookup),
}

impl Retriever {
    pub fn kind(&self) -> RetrieverKind {
        match self {
            Retriever::Dense(_) => RetrieverKind::Dense,
            Retriever::Keyword(_) => RetrieverKind::Keyword,
            Retriever::PageIndex(_) => RetrieverKind::PageIndex,
        }
    }

    pub async fn load(&self) -> Result<()> {
        match self {
            Retriever::Dense(index) => index.load().await,
            Retriever::Keyword(index) => index.load().await,
            Retriever::PageIndex(_) => Ok(()),
        }
    }

    pub async fn build(&self, repository: &dyn PageStore) -> Result<()> {
        match self {
            Retriever::Dense(index) => index.build(repository).await,
            Retriever::Keyword(index) => index.build(repository).await,
            Retriever::PageIndex(_) => Ok(()),
        }
    }

    pub async fn update(&self, repository: &dyn PageStore) -> Result<()> {
        match self {
            Retriever::Dense(index) => index.update(repository).await,
            Retriever::Keyword(index) => index.update(repository).await,
            Retriever::PageIndex(_) => Ok(()),
        }
    }

    pub async fn search(&self, queries: &[String], top_k: usize) -> Vec<Vec<Hit>> {
        match self {
            Retriever::Dense(index) => index.search(queries, top_k).await,
            Retriever::Keyword(index) => index.search(queries, top_k).await,
            Retriever::PageIndex(lookup) => lookup.search(queries),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        match self {
            Retriever::Dense(index) => index.clear().await,
            Retriever::Keyword(index) => index.clear().await,
            Retriever::PageIndex(_) => Ok(()),
        }
    }

    /// 인덱싱된 페이지 수. 페이지 인덱스 조회는 항상 최신이므로 `None`
    pub fn indexed_count(&self) -> Option<usize> {
        match self {
            Retriever::Dense(index) => Some(index.indexed_count()),
            Retriever::Keyword(index) => Some(index.indexed_count()),
            Retriever::PageIndex(_) => None,
        }
    }
}

// ============================================================================
// RetrieverSet
// ============================================================================

#[derive(Default)]
pub struct RetrieverSet {
    retrievers: Vec<Retriever>,
}

impl RetrieverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 검색기 추가 (같은 종류는 교체)
    pub fn with(mut self, retriever: Retriever) -> Self {
        self.retrievers.retain(|r| r.kind() != retriever.kind());
        self.retrievers.push(retriever);
        self
    }

    pub fn get(&self, kind: RetrieverKind) -> Option<&Retriever> {
        self.retrievers.iter().find(|r| r.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Retriever> {
        self.retrievers.iter()
    }

    /// 저장소와 인덱스 길이가 다른 검색기만 `update`
    ///
    /// 반환값은 갱신한 검색기 목록입니다.
    pub async fn refresh(&self, repository: &dyn PageStore) -> Result<Vec<RetrieverKind>> {
        let current = repository.len()?;
        let mut refreshed = Vec::new();

        for retriever in &self.retrievers {
            if retriever.indexed_count().is_none() {
                continue;
            }

            if retriever.indexed_count() != Some(current) {
                // 디스크에 최신 인덱스가 있을 수 있음
                if let Err(e) = retriever.load().await {
                    tracing::debug!("{} index not loaded: {}", retriever.kind(), e);
                }
            }

            if retriever.indexed_count() != Some(current) {
                tracing::info!(
                    "Refreshing {} index ({:?} -> {} pages)",
                    retriever.kind(),
                    retriever.indexed_count(),
                    current
                );
                retriever.update(repository).await?;
                refreshed.push(retriever.kind());
            }
        }

        Ok(refreshed)
    }

    /// 모든 검색기 전체 재빌드
    pub async fn rebuild(&self, repository: &dyn PageStore) -> Result<()> {
        for retriever in &self.retrievers {
            retriever.build(repository).await?;
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        for retriever in &self.retrievers {
            retriever.clear().await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
