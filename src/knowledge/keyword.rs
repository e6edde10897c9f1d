//! Keyword Index - SQLite FTS5 기반 BM25 검색
//!
//! 디렉토리 구조 (`<index_dir>`):
//! - `documents/documents.jsonl`: 페이지 덤프 (`{"id": "<index>", "contents": "..."}`)
//! - `index/keyword.db`: 위 파일로 만든 FTS5 테이블 (rowid = 페이지 인덱스)
//! - `pages.json`: 인덱싱 시점 페이지 스냅샷
//!
//! 증분 업데이트는 없습니다. `update`는 항상 전체 재빌드입니다.
//! 인덱스를 불러올 수 없으면 저장소를 직접 훑는 부분 문자열 검색으로 대체합니다.
//!
//! source: https://www.sqlite.org/fts5.html#the_bm25_function

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::hybrid::{Hit, HitSource};
use super::page::{Page, PageStore};

/// 인덱싱 단계 최대 시도 횟수
const MAX_BUILD_ATTEMPTS: u32 = 2;

const DOCUMENTS_FILE: &str = "documents.jsonl";
const INDEX_FILE: &str = "keyword.db";
const PAGES_FILE: &str = "pages.json";

// ============================================================================
// Types
// ============================================================================

/// `documents.jsonl` 한 줄
#[derive(Debug, Serialize, Deserialize)]
struct DocumentLine {
    id: String,
    contents: String,
}

struct KeywordSnapshot {
    pages: Vec<Page>,
    conn: Mutex<Connection>,
}

// ============================================================================
// KeywordIndex
// ============================================================================

pub struct KeywordIndex {
    dir: PathBuf,
    /// 폴백 검색용 저장소
    repository: Arc<dyn PageStore>,
    snapshot: ArcSwapOption<KeywordSnapshot>,
    writer: tokio::sync::Mutex<()>,
}

impl KeywordIndex {
    pub fn new(dir: impl Into<PathBuf>, repository: Arc<dyn PageStore>) -> Self {
        Self {
            dir: dir.into(),
            repository,
            snapshot: ArcSwapOption::empty(),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    fn documents_dir(&self) -> PathBuf {
        self.dir.join("documents")
    }

    fn index_dir(&self) -> PathBuf {
        self.dir.join("index")
    }

    fn pages_path(&self) -> PathBuf {
        self.dir.join(PAGES_FILE)
    }

    pub fn indexed_count(&self) -> usize {
        self.snapshot
            .load_full()
            .map(|s| s.pages.len())
            .unwrap_or(0)
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().is_some()
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// 디스크의 인덱스 불러오기
    pub async fn load(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        if self.is_loaded() {
            return Ok(());
        }

        let db_path = self.index_dir().join(INDEX_FILE);
        let pages_path = self.pages_path();
        if !db_path.exists() || !pages_path.exists() {
            return Err(Error::IndexMissing(self.dir.clone()));
        }

        let pages: Vec<Page> = serde_json::from_str(&fs::read_to_string(&pages_path)?)?;
        self.install(pages, &db_path)?;

        tracing::debug!("Loaded keyword index from {:?}", self.dir);
        Ok(())
    }

    /// 전체 재빌드
    pub async fn build(&self, repository: &dyn PageStore) -> Result<()> {
        let _guard = self.writer.lock().await;

        let pages = repository.load()?;

        remove_dir(&self.index_dir())?;
        remove_dir(&self.documents_dir())?;
        fs::create_dir_all(self.documents_dir())?;

        let documents_path = self.documents_dir().join(DOCUMENTS_FILE);
        write_documents(&documents_path, &pages)?;

        let db_path = build_with_retry(&documents_path, &self.index_dir())?;

        fs::write(self.pages_path(), serde_json::to_string(&pages)?)?;

        self.install(pages, &db_path)?;
        tracing::info!("Keyword index built: {} pages", self.indexed_count());
        Ok(())
    }

    /// 항상 전체 재빌드
    pub async fn update(&self, repository: &dyn PageStore) -> Result<()> {
        self.build(repository).await
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.writer.lock().await;
        self.snapshot.store(None);
        remove_dir(&self.dir)?;
        tracing::info!("Keyword index cleared");
        Ok(())
    }

    fn install(&self, pages: Vec<Page>, db_path: &Path) -> Result<()> {
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        self.snapshot.store(Some(Arc::new(KeywordSnapshot {
            pages,
            conn: Mutex::new(conn),
        })));
        Ok(())
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// 질의별 BM25 검색. 결과 목록은 입력 질의 순서와 같음
    pub async fn search(&self, queries: &[String], top_k: usize) -> Vec<Vec<Hit>> {
        if !self.is_loaded() {
            if let Err(e) = self.load().await {
                tracing::warn!("Keyword index unavailable ({}), using substring scan", e);
                return self.fallback_search(queries, top_k);
            }
        }

        let Some(snapshot) = self.snapshot.load_full() else {
            return self.fallback_search(queries, top_k);
        };

        queries
            .iter()
            .map(|query| match search_fts(&snapshot, query, top_k) {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::warn!("Keyword search failed for {:?}: {}", query, e);
                    vec![]
                }
            })
            .collect()
    }

    /// 대소문자 무시 부분 문자열 검색 (content, header)
    fn fallback_search(&self, queries: &[String], top_k: usize) -> Vec<Vec<Hit>> {
        let pages = match self.repository.load() {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!("Fallback scan could not read pages: {}", e);
                return queries.iter().map(|_| Vec::new()).collect();
            }
        };

        queries
            .iter()
            .map(|query| substring_scan(&pages, query, top_k))
            .collect()
    }
}

// ============================================================================
// Indexing
// ============================================================================

fn write_documents(path: &Path, pages: &[Page]) -> Result<()> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for (i, page) in pages.iter().enumerate() {
        let line = DocumentLine {
            id: i.to_string(),
            contents: page.content.clone(),
        };
        serde_json::to_writer(&mut writer, &line)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// 인덱싱 단계 실행. 실패하면 인덱스 디렉토리를 비우고 다시 시도
fn build_with_retry(documents_path: &Path, index_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(index_dir)?;
    let db_path = index_dir.join(INDEX_FILE);

    let mut attempt = 1;
    loop {
        match index_documents(documents_path, &db_path) {
            Ok(count) => {
                tracing::debug!("Indexed {} documents into {:?}", count, db_path);
                return Ok(db_path);
            }
            Err(e) if attempt >= MAX_BUILD_ATTEMPTS => {
                return Err(Error::IndexBuild {
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    "Keyword indexing failed, retrying {}/{}: {}",
                    attempt,
                    MAX_BUILD_ATTEMPTS,
                    e
                );
                remove_dir(index_dir)?;
                fs::create_dir_all(index_dir)?;
                attempt += 1;
            }
        }
    }
}

/// `documents.jsonl` → FTS5 테이블
fn index_documents(documents_path: &Path, db_path: &Path) -> Result<usize> {
    let reader = BufReader::new(fs::File::open(documents_path)?);

    let mut conn = Connection::open(db_path)?;
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS documents USING fts5(contents, tokenize = 'unicode61');",
    )?;

    let tx = conn.transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare("INSERT INTO documents(rowid, contents) VALUES (?1, ?2)")?;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let doc: DocumentLine = serde_json::from_str(&line)?;
            let rowid: i64 = doc
                .id
                .parse()
                .map_err(|_| Error::Corrupt(format!("non-numeric document id {:?}", doc.id)))?;
            stmt.execute(params![rowid, doc.contents])?;
            count += 1;
        }
    }
    tx.commit()?;

    Ok(count)
}

fn remove_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}

// ============================================================================
// Searching
// ============================================================================

fn search_fts(snapshot: &KeywordSnapshot, query: &str, top_k: usize) -> Result<Vec<Hit>> {
    let match_expr = escape_fts5_query(query);
    if match_expr.is_empty() || top_k == 0 {
        return Ok(vec![]);
    }

    let conn = snapshot.conn.lock().unwrap_or_else(|e| e.into_inner());
    let mut stmt = conn.prepare(
        r#"
        SELECT rowid, bm25(documents) AS score
        FROM documents
        WHERE documents MATCH ?1
        ORDER BY bm25(documents)
        LIMIT ?2
        "#,
    )?;

    let rows = stmt
        .query_map(params![match_expr, top_k as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let hits = rows
        .into_iter()
        .filter_map(|(rowid, bm25)| {
            let index = usize::try_from(rowid).ok()?;
            let page = snapshot.pages.get(index)?;
            Some((index, page, bm25))
        })
        .enumerate()
        .map(|(rank, (index, page, bm25))| {
            // bm25()는 작을수록 관련도가 높음
            Hit::new(index, page.content.clone(), HitSource::Keyword, rank, -bm25)
        })
        .collect();

    Ok(hits)
}

/// 토큰마다 따옴표로 감싸 OR로 연결
///
/// unicode61 토크나이저와 같은 구분자(영숫자가 아닌 문자)로 나누므로
/// "e-mail"은 `"e" OR "mail"`이 됩니다.
fn escape_fts5_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| format!("\"{}\"", token))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn substring_scan(pages: &[Page], query: &str, top_k: usize) -> Vec<Hit> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return vec![];
    }

    pages
        .iter()
        .enumerate()
        .filter_map(|(i, page)| {
            let occurrences = page.content.to_lowercase().matches(&needle).count()
                + page.header.to_lowercase().matches(&needle).count();
            (occurrences > 0).then_some((i, page, occurrences))
        })
        .take(top_k)
        .enumerate()
        .map(|(rank, (i, page, occurrences))| {
            Hit::new(i, page.content.clone(), HitSource::Keyword, rank, occurrences as f64)
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
