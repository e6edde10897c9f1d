//! gam-rag - 하이브리드 검색 기반 에이전트 메모리 엔진
//!
//! 입력 텍스트를 추상(abstract) + 페이지로 저장하고, Dense 임베딩 검색과
//! SQLite FTS5 키워드 검색을 RRF로 통합한 리서치 루프
//! (PLAN → SEARCH → INTEGRATE → REFLECT)로 질문에 답합니다.
//!
//! ```rust,ignore
//! let engine = MemoryEngine::open(&EngineConfig::from_env()?).await?;
//! engine.memorize("Paris is the capital of France.").await?;
//! let output = engine.research("What is the capital of France?").await?;
//! ```

pub mod agent;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod knowledge;

// Re-exports
pub use agent::{
    MemoryBuilder, MemoryUpdate, ReflectionPolicy, ResearchConfig, ResearchLoop, ResearchOutput,
    ResearchResult, SearchPlan,
};
pub use config::{get_data_dir, EngineConfig};
pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder, HttpEmbedderConfig};
pub use engine::{EngineParts, EngineStats, MemoryEngine};
pub use error::{Error, Result};
pub use generation::{Generation, Generator, OpenAiConfig, OpenAiGenerator};
pub use knowledge::{
    reciprocal_rank_fusion, DenseIndex, Hit, HitSource, KeywordIndex, KnowledgeStore,
    MemoryState, MemoryStore, Page, PageStore, RetrieverKind, RetrieverSet,
};
