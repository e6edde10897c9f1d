//! 페이지 / 메모리 데이터 모델과 저장소 트레이트
//!
//! - Page: 불변 텍스트 청크. 저장소 내 위치(index)가 곧 ID
//! - MemoryState: 추상(abstract) 목록. 추가만 가능 (전체 clear 제외)
//!
//! 인메모리 구현은 테스트와 일회성 세션용이고,
//! 영속 구현은 [`super::store::KnowledgeStore`] (SQLite) 입니다.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

// ============================================================================
// Types
// ============================================================================

/// 저장된 페이지 (불변)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    /// 페이지 헤더 (`[ABSTRACT] ...`)
    pub header: String,
    /// 원본 텍스트
    pub content: String,
    /// 부가 정보
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Page {
    pub fn new(header: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            content: content.into(),
            metadata: Map::new(),
        }
    }

    /// 메타데이터 항목 추가 (빌더)
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// 메모리 상태 - 추상 목록 (삽입 순서 유지)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryState {
    pub abstracts: Vec<String>,
}

impl MemoryState {
    /// 프롬프트용 컨텍스트 (`Page {i}: {abstract}`)
    pub fn to_context(&self) -> String {
        if self.abstracts.is_empty() {
            return "No memory currently.".to_string();
        }

        self.abstracts
            .iter()
            .enumerate()
            .map(|(i, a)| format!("Page {}: {}", i, a))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Store Traits
// ============================================================================

/// 페이지 저장소
///
/// 인덱스는 한 번 부여되면 바뀌지 않습니다. 길이는 `clear()` 전까지 증가만 합니다.
pub trait PageStore: Send + Sync {
    /// 전체 페이지 (인덱스 순)
    fn load(&self) -> Result<Vec<Page>>;

    /// 페이지 추가, 부여된 인덱스 반환
    fn add(&self, page: Page) -> Result<usize>;

    /// 인덱스로 조회
    fn get(&self, index: usize) -> Result<Option<Page>>;

    /// 전체 교체
    fn save(&self, pages: &[Page]) -> Result<()>;

    fn clear(&self) -> Result<()>;

    fn len(&self) -> Result<usize> {
        Ok(self.load()?.len())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// 메모리(추상) 저장소
pub trait MemoryStore: Send + Sync {
    fn load(&self) -> Result<MemoryState>;

    /// 추상 추가. 동일 문자열이 이미 있으면 `false`
    fn add(&self, abstract_text: &str) -> Result<bool>;

    fn save(&self, state: &MemoryState) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

// ============================================================================
// In-memory Implementations
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryPageStore {
    pages: RwLock<Vec<Page>>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: Vec<Page>) -> Self {
        Self {
            pages: RwLock::new(pages),
        }
    }
}

impl PageStore for InMemoryPageStore {
    fn load(&self) -> Result<Vec<Page>> {
        Ok(read(&self.pages).clone())
    }

    fn add(&self, page: Page) -> Result<usize> {
        let mut pages = write(&self.pages);
        pages.push(page);
        Ok(pages.len() - 1)
    }

    fn get(&self, index: usize) -> Result<Option<Page>> {
        Ok(read(&self.pages).get(index).cloned())
    }

    fn save(&self, pages: &[Page]) -> Result<()> {
        *write(&self.pages) = pages.to_vec();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        write(&self.pages).clear();
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        Ok(read(&self.pages).len())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    fn load(&self) -> Result<MemoryState> {
        Ok(read(&self.state).clone())
    }

    fn add(&self, abstract_text: &str) -> Result<bool> {
        let mut state = write(&self.state);
        if state.abstracts.iter().any(|a| a == abstract_text) {
            return Ok(false);
        }
        state.abstracts.push(abstract_text.to_string());
        Ok(true)
    }

    fn save(&self, state: &MemoryState) -> Result<()> {
        *write(&self.state) = state.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        write(&self.state).abstracts.clear();
        Ok(())
    }
}

// 포이즌된 락은 내부 데이터를 그대로 사용
fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_indices_are_monotonic() {
        let store = InMemoryPageStore::new();
        assert_eq!(store.add(Page::new("h0", "c0")).unwrap(), 0);
        assert_eq!(store.add(Page::new("h1", "c1")).unwrap(), 1);

        let before = store.len().unwrap();
        store.add(Page::new("h2", "c2")).unwrap();
        assert!(store.len().unwrap() > before);

        // 기존 인덱스는 그대로
        assert_eq!(store.get(0).unwrap().unwrap().content, "c0");
        assert!(store.get(7).unwrap().is_none());
    }

    #[test]
    fn test_memory_dedup() {
        let store = InMemoryMemoryStore::new();
        assert!(store.add("Paris is the capital of France").unwrap());
        assert!(!store.add("Paris is the capital of France").unwrap());
        assert!(store.add("Python is a language").unwrap());
        assert_eq!(store.load().unwrap().abstracts.len(), 2);

        store.clear().unwrap();
        assert!(store.load().unwrap().abstracts.is_empty());
    }

    #[test]
    fn test_memory_context() {
        let empty = MemoryState::default();
        assert_eq!(empty.to_context(), "No memory currently.");

        let state = MemoryState {
            abstracts: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(state.to_context(), "Page 0: a\nPage 1: b");
    }

    #[test]
    fn test_page_serde_default_metadata() {
        let page: Page = serde_json::from_str(r#"{"header":"h","content":"c"}"#).unwrap();
        assert!(page.metadata.is_empty());

        let page = Page::new("h", "c").with_meta("decorated", "h; c");
        assert_eq!(page.metadata["decorated"], "h; c");
    }
}
