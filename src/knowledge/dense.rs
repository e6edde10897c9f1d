//! Dense Index - 임베딩 기반 의미 검색
//!
//! 페이지 `content`를 임베딩해 정규화된 행렬 위에서 내적 검색을 합니다.
//!
//! - build: 전체 재인코딩 + LanceDB 테이블 교체
//! - update: 저장소가 늘어난 만큼만 꼬리(tail) 인코딩 후 이어 붙임
//! - search: 질의별 최근접 검색 결과를 페이지 단위로 **합산**
//!
//! 검색 가능한 스냅샷은 `ArcSwapOption`에 두고, 쓰기는 Mutex로 직렬화합니다.
//! 읽기 쪽은 새 스냅샷이 교체되기 전까지 이전 스냅샷을 그대로 봅니다.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;

use crate::embedding::Embedder;
use crate::error::{Error, Result};

use super::hybrid::{Hit, HitSource};
use super::lance::{EmbeddingRow, EmbeddingTable};
use super::page::{Page, PageStore};
use super::vector::FlatIndex;

// ============================================================================
// Snapshot
// ============================================================================

/// 인덱싱 시점의 페이지와 임베딩 행렬 (행 = 페이지 인덱스)
#[derive(Debug)]
struct DenseSnapshot {
    pages: Vec<Page>,
    embeddings: Vec<Vec<f32>>,
    index: FlatIndex,
}

impl DenseSnapshot {
    fn new(pages: Vec<Page>, embeddings: Vec<Vec<f32>>, dimension: usize) -> Self {
        let index = FlatIndex::build(&embeddings, dimension);
        Self {
            pages,
            embeddings,
            index,
        }
    }
}

// ============================================================================
// DenseIndex
// ============================================================================

pub struct DenseIndex {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    table: EmbeddingTable,
    snapshot: ArcSwapOption<DenseSnapshot>,
    writer: Mutex<()>,
}

impl DenseIndex {
    /// 인덱스 디렉토리 열기. 스냅샷은 `load()`/`build()` 전까지 비어 있음
    pub async fn open(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let table = EmbeddingTable::open(dir, embedder.dimension()).await?;

        Ok(Self {
            dir: dir.to_path_buf(),
            embedder,
            table,
            snapshot: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        })
    }

    /// 마지막으로 인덱싱한 페이지 수
    pub fn indexed_count(&self) -> usize {
        self.snapshot
            .load_full()
            .map(|s| s.pages.len())
            .unwrap_or(0)
    }

    /// LanceDB 테이블에 저장된 행 수
    pub async fn persisted_count(&self) -> Result<usize> {
        self.table.count().await
    }

    /// 현재 임베딩 행렬 사본
    pub fn embedding_matrix(&self) -> Vec<Vec<f32>> {
        self.snapshot
            .load_full()
            .map(|s| s.embeddings.clone())
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().is_some()
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// 영속화된 스냅샷 복원
    pub async fn load(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        if self.is_loaded() {
            return Ok(());
        }
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<()> {
        let rows = self
            .table
            .load()
            .await?
            .ok_or_else(|| Error::IndexMissing(self.dir.clone()))?;

        let mut pages = Vec::with_capacity(rows.len());
        let mut embeddings = Vec::with_capacity(rows.len());
        for (expected, row) in rows.into_iter().enumerate() {
            if row.page_id != expected {
                return Err(Error::Corrupt(format!(
                    "embedding rows are not contiguous (expected page {}, found {})",
                    expected, row.page_id
                )));
            }
            pages.push(row.page);
            embeddings.push(row.embedding);
        }

        tracing::debug!("Loaded dense index with {} pages", pages.len());
        self.install(pages, embeddings);
        Ok(())
    }

    /// 전체 재빌드
    pub async fn build(&self, repository: &dyn PageStore) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.build_locked(repository).await
    }

    async fn build_locked(&self, repository: &dyn PageStore) -> Result<()> {
        let pages = repository.load()?;
        let embeddings = self.encode_pages(&pages).await?;

        let rows = to_rows(0, &pages, &embeddings);
        self.table.replace(&rows).await?;

        tracing::info!(
            "Dense index built: {} pages ({}, dim {})",
            pages.len(),
            self.embedder.name(),
            self.embedder.dimension()
        );
        self.install(pages, embeddings);
        Ok(())
    }

    /// 증분 업데이트
    ///
    /// - 저장소가 줄어듦 → 전체 재빌드
    /// - 변화 없음 → 아무것도 하지 않음
    /// - 늘어남 → 새 페이지만 인코딩
    pub async fn update(&self, repository: &dyn PageStore) -> Result<()> {
        let _guard = self.writer.lock().await;

        if !self.is_loaded() {
            if let Err(e) = self.load_locked().await {
                tracing::debug!("No persisted dense index ({}), building", e);
                return self.build_locked(repository).await;
            }
        }

        let Some(current) = self.snapshot.load_full() else {
            return self.build_locked(repository).await;
        };

        let pages = repository.load()?;
        let indexed = current.pages.len();

        if pages.len() < indexed {
            let drift = Error::DriftInconsistency {
                indexed,
                current: pages.len(),
            };
            tracing::warn!("{}, rebuilding dense index", drift);
            return self.build_locked(repository).await;
        }

        if pages.len() == indexed {
            tracing::debug!("Dense index up to date ({} pages)", indexed);
            return Ok(());
        }

        let tail = &pages[indexed..];
        let tail_embeddings = self.encode_pages(tail).await?;

        let rows = to_rows(indexed, tail, &tail_embeddings);
        self.table.append(&rows).await?;

        let mut embeddings = current.embeddings.clone();
        embeddings.extend(tail_embeddings);

        tracing::info!(
            "Dense index updated: {} -> {} pages",
            indexed,
            pages.len()
        );
        self.install(pages, embeddings);
        Ok(())
    }

    /// 영속 데이터 삭제 + 스냅샷 초기화
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.table.drop_all().await?;
        self.snapshot.store(None);
        tracing::info!("Dense index cleared");
        Ok(())
    }

    fn install(&self, pages: Vec<Page>, embeddings: Vec<Vec<f32>>) {
        let snapshot = DenseSnapshot::new(pages, embeddings, self.embedder.dimension());
        self.snapshot.store(Some(Arc::new(snapshot)));
    }

    /// 페이지 인코딩. 빈 페이지는 영벡터 자리표시자
    async fn encode_pages(&self, pages: &[Page]) -> Result<Vec<Vec<f32>>> {
        let dimension = self.embedder.dimension();
        let mut embeddings = vec![vec![0.0f32; dimension]; pages.len()];

        let positions: Vec<usize> = pages
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.content.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        if positions.is_empty() {
            return Ok(embeddings);
        }

        let texts: Vec<String> = positions.iter().map(|&i| pages[i].content.clone()).collect();
        let encoded = self.encode_with_retry(&texts).await?;

        for (position, vector) in positions.into_iter().zip(encoded) {
            embeddings[position] = vector;
        }

        Ok(embeddings)
    }

    /// 한 번 재시도, 두 번째 실패는 `Error::Encoding`
    async fn encode_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let first = match self.encode_checked(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) => e,
        };

        tracing::warn!("Encoding {} pages failed ({}), retrying once", texts.len(), first);

        self.encode_checked(texts).await.map_err(|e| match e {
            Error::Encoding { .. } => e,
            other => Error::encoding(other),
        })
    }

    async fn encode_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.embedder.encode_corpus(texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::encoding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// 다중 질의 검색
    ///
    /// 질의마다 최근접 `top_k`를 찾은 뒤 같은 페이지의 점수를 합산하고,
    /// 합산 점수 내림차순으로 `top_k`개를 돌려줍니다 (동점은 처음 본 순서).
    /// 결과는 합산된 목록 하나입니다.
    ///
    /// 인덱스가 없고 `load()`도 실패하면 질의마다 빈 목록을 돌려줍니다.
    pub async fn search(&self, queries: &[String], top_k: usize) -> Vec<Vec<Hit>> {
        let empty = || queries.iter().map(|_| Vec::new()).collect::<Vec<_>>();

        let snapshot = match self.snapshot.load_full() {
            Some(snapshot) => snapshot,
            None => {
                if let Err(e) = self.load().await {
                    tracing::debug!("Dense index unavailable: {}", e);
                    return empty();
                }
                match self.snapshot.load_full() {
                    Some(snapshot) => snapshot,
                    None => return empty(),
                }
            }
        };

        let queries: Vec<String> = queries
            .iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if queries.is_empty() {
            return vec![vec![]];
        }

        let query_vectors = match self.embedder.encode_queries(&queries).await {
            Ok(vectors) if vectors.len() == queries.len() => vectors,
            Ok(vectors) => {
                tracing::warn!(
                    "Query encoding returned {} vectors for {} queries",
                    vectors.len(),
                    queries.len()
                );
                return empty();
            }
            Err(e) => {
                tracing::warn!("Query encoding failed: {}", e);
                return empty();
            }
        };

        // page -> (점수 합, 처음 본 순서)
        let mut positions: HashMap<usize, usize> = HashMap::new();
        let mut totals: Vec<(usize, f64)> = Vec::new();

        for vector in &query_vectors {
            for (page, score) in snapshot.index.search(vector, top_k) {
                match positions.get(&page) {
                    Some(&pos) => totals[pos].1 += score as f64,
                    None => {
                        positions.insert(page, totals.len());
                        totals.push((page, score as f64));
                    }
                }
            }
        }

        totals.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        totals.truncate(top_k);

        let hits = totals
            .into_iter()
            .enumerate()
            .filter_map(|(rank, (page, score))| {
                let content = &snapshot.pages.get(page)?.content;
                Some(Hit::new(page, content.clone(), HitSource::Dense, rank, score))
            })
            .collect();

        vec![hits]
    }
}

fn to_rows(offset: usize, pages: &[Page], embeddings: &[Vec<f32>]) -> Vec<EmbeddingRow> {
    pages
        .iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (page, embedding))| EmbeddingRow {
            page_id: offset + i,
            page: page.clone(),
            embedding: embedding.clone(),
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
