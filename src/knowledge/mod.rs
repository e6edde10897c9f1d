//! Knowledge 모듈 - 페이지 저장소와 하이브리드 검색
//!
//! - Page / Memory: 페이지 저장소와 추상 메모리 (SQLite 또는 인메모리)
//! - Dense: 임베딩 행렬 + 내적 검색, 증분 업데이트 (LanceDB에 영속화)
//! - Keyword: SQLite FTS5 BM25 검색, 부분 문자열 폴백
//! - Hybrid: RRF 알고리즘으로 검색 결과 통합
//! - Chunker: 긴 문서 윈도우 분할

mod chunker;
mod dense;
mod hybrid;
mod keyword;
mod lance;
mod page;
mod page_index;
mod retriever;
mod store;
mod vector;

// Re-exports
pub use chunker::{default_chunker, ChunkConfig, Chunker, WindowChunker};
pub use dense::DenseIndex;
pub use hybrid::{reciprocal_rank_fusion, Hit, HitMeta, HitSource, PAGE_INDEX_WEIGHT, RRF_K};
pub use keyword::KeywordIndex;
pub use lance::{EmbeddingRow, EmbeddingTable};
pub use page::{InMemoryMemoryStore, InMemoryPageStore, MemoryState, MemoryStore, Page, PageStore};
pub use page_index::PageIndexLookup;
pub use retriever::{Retriever, RetrieverKind, RetrieverSet};
pub use store::{KnowledgeStore, StoreStats, StoredPage};
pub use vector::{cosine_similarity, FlatIndex};
