//! Knowledge Store - rusqlite 기반 페이지/메모리 저장소
//!
//! 페이지(원본 청크)와 추상(메모리) 목록을 하나의 SQLite 파일에 저장합니다.
//! 저장 위치: `<data_dir>/knowledge.db`
//!
//! 페이지 ID는 `position` 컬럼(0부터 증가)이며 삽입 후 바뀌지 않습니다.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

use super::page::{MemoryState, MemoryStore, Page, PageStore};

// ============================================================================
// Types
// ============================================================================

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub page_count: usize,
    pub abstract_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

/// 페이지 목록 조회용 (생성 시각 포함)
#[derive(Debug, Clone, Serialize)]
pub struct StoredPage {
    pub index: usize,
    pub page: Page,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// Knowledge Store - 동기 SQLite 저장소
///
/// [`PageStore`]와 [`MemoryStore`]를 모두 구현합니다.
pub struct KnowledgeStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 인메모리 SQLite (테스트용)
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                position INTEGER PRIMARY KEY,
                header TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS abstracts (
                position INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 최근 페이지 목록 (인덱스 내림차순)
    pub fn list_pages(&self, limit: usize) -> Result<Vec<StoredPage>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT position, header, content, metadata, created_at FROM pages
             ORDER BY position DESC
             LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    PageRow {
                        header: row.get(1)?,
                        content: row.get(2)?,
                        metadata: row.get(3)?,
                    },
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(position, row, created_at)| {
                Ok(StoredPage {
                    index: position as usize,
                    page: row.into_page()?,
                    created_at: parse_datetime(&created_at),
                })
            })
            .collect()
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock();

        let page_count: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        let abstract_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM abstracts", [], |row| row.get(0))?;
        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(content AS BLOB))), 0) FROM pages",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            page_count: page_count as usize,
            abstract_count: abstract_count as usize,
            total_content_bytes: total_size as usize,
            db_path: self.db_path.clone(),
        })
    }
}

impl PageStore for KnowledgeStore {
    fn load(&self) -> Result<Vec<Page>> {
        let conn = self.lock();

        let mut stmt =
            conn.prepare("SELECT header, content, metadata FROM pages ORDER BY position")?;
        let rows = stmt
            .query_map([], PageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(PageRow::into_page).collect()
    }

    fn add(&self, page: Page) -> Result<usize> {
        let conn = self.lock();

        let position: i64 = conn.query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        conn.execute(
            "INSERT INTO pages (position, header, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                position,
                page.header,
                page.content,
                serde_json::to_string(&page.metadata)?,
                Utc::now().to_rfc3339(),
            ],
        )?;

        tracing::debug!("Added page #{}", position);
        Ok(position as usize)
    }

    fn get(&self, index: usize) -> Result<Option<Page>> {
        let conn = self.lock();

        let row = conn
            .query_row(
                "SELECT header, content, metadata FROM pages WHERE position = ?1",
                params![index as i64],
                PageRow::from_row,
            )
            .optional()?;

        row.map(PageRow::into_page).transpose()
    }

    fn save(&self, pages: &[Page]) -> Result<()> {
        let mut conn = self.lock();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM pages", [])?;
        for (position, page) in pages.iter().enumerate() {
            tx.execute(
                "INSERT INTO pages (position, header, content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    position as i64,
                    page.header,
                    page.content,
                    serde_json::to_string(&page.metadata)?,
                    now,
                ],
            )?;
        }
        tx.commit()?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock().execute("DELETE FROM pages", [])?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM pages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl MemoryStore for KnowledgeStore {
    fn load(&self) -> Result<MemoryState> {
        let conn = self.lock();

        let mut stmt = conn.prepare("SELECT text FROM abstracts ORDER BY position")?;
        let abstracts = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(MemoryState { abstracts })
    }

    fn add(&self, abstract_text: &str) -> Result<bool> {
        let inserted = self.lock().execute(
            "INSERT OR IGNORE INTO abstracts (text, created_at) VALUES (?1, ?2)",
            params![abstract_text, Utc::now().to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn save(&self, state: &MemoryState) -> Result<()> {
        let mut conn = self.lock();
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM abstracts", [])?;
        for text in &state.abstracts {
            tx.execute(
                "INSERT OR IGNORE INTO abstracts (text, created_at) VALUES (?1, ?2)",
                params![text, now],
            )?;
        }
        tx.commit()?;

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock().execute("DELETE FROM abstracts", [])?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

struct PageRow {
    header: String,
    content: String,
    metadata: String,
}

impl PageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            header: row.get(0)?,
            content: row.get(1)?,
            metadata: row.get(2)?,
        })
    }

    fn into_page(self) -> Result<Page> {
        let metadata: Map<String, Value> = serde_json::from_str(&self.metadata)?;
        Ok(Page {
            header: self.header,
            content: self.content,
            metadata,
        })
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
