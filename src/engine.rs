//! MemoryEngine - 저장소, 검색기, 메모리 빌더, 리서치 루프를 묶는 컨텍스트
//!
//! 프로세스당 하나를 만들어 공유합니다. 일반 작업은 게이트를 공유 잠금으로,
//! `clear_all`은 배타 잠금으로 잡아 초기화 중에는 다른 작업이 끼어들지 않습니다.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::agent::{MemoryBuilder, MemoryUpdate, ResearchConfig, ResearchLoop, ResearchOutput};
use crate::config::EngineConfig;
use crate::embedding::{Embedder, HashingEmbedder, HttpEmbedder, HttpEmbedderConfig};
use crate::error::{Error, Result};
use crate::generation::{DisabledGenerator, Generator, OpenAiGenerator};
use crate::knowledge::{
    default_chunker, reciprocal_rank_fusion, Chunker, DenseIndex, Hit, KeywordIndex,
    KnowledgeStore, MemoryState, MemoryStore, Page, PageIndexLookup, PageStore, Retriever,
    RetrieverKind, RetrieverSet, StoreStats, RRF_K,
};

/// 수집 가능한 최소 문서 길이 (문자 수)
pub const MIN_DOCUMENT_CHARS: usize = 50;

/// 명시적으로 조립할 때 쓰는 구성 요소
pub struct EngineParts {
    pub pages: Arc<dyn PageStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub embedder: Arc<dyn Embedder>,
    pub generator: Arc<dyn Generator>,
    pub dense_dir: PathBuf,
    pub keyword_dir: PathBuf,
    pub research: ResearchConfig,
}

/// 엔진 통계
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub page_count: usize,
    pub abstract_count: usize,
    pub dense_indexed: usize,
    /// LanceDB에 영속화된 Dense 행 수
    pub dense_persisted: usize,
    pub keyword_indexed: usize,
    pub embedder: String,
    pub generator: String,
    /// SQLite 저장소를 쓰는 경우
    pub store: Option<StoreStats>,
}

pub struct MemoryEngine {
    store: Option<Arc<KnowledgeStore>>,
    pages: Arc<dyn PageStore>,
    memory: Arc<dyn MemoryStore>,
    retrievers: Arc<RetrieverSet>,
    builder: MemoryBuilder,
    research: ResearchLoop,
    chunker: Box<dyn Chunker>,
    embedder_name: String,
    generator_name: String,
    gate: RwLock<()>,
}

impl MemoryEngine {
    /// 설정으로 엔진 열기
    ///
    /// LLM API 키가 없으면 생성 호출이 모두 실패하는 생성기를 씁니다
    /// (조회/통계/초기화는 그대로 동작).
    pub async fn open(config: &EngineConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(KnowledgeStore::open(&config.knowledge_db_path())?);

        let embedder: Arc<dyn Embedder> = match &config.embedding_api_url {
            Some(url) => Arc::new(HttpEmbedder::new(HttpEmbedderConfig::new(
                url.clone(),
                config.embedding_dimension,
            ))?),
            None => Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        };

        let generator: Arc<dyn Generator> = match config.openai_config() {
            Ok(openai) => Arc::new(OpenAiGenerator::new(openai)?),
            Err(e) => {
                tracing::warn!("Generation disabled: {}", e);
                Arc::new(DisabledGenerator::new(e.to_string()))
            }
        };

        let mut engine = Self::from_parts(EngineParts {
            pages: store.clone(),
            memory: store.clone(),
            embedder,
            generator,
            dense_dir: config.dense_index_dir(),
            keyword_dir: config.keyword_index_dir(),
            research: config.research_config(),
        })
        .await?;
        engine.store = Some(store);

        tracing::info!("Memory engine opened at {:?}", config.data_dir);
        Ok(engine)
    }

    /// 구성 요소로 조립
    pub async fn from_parts(parts: EngineParts) -> Result<Self> {
        let EngineParts {
            pages,
            memory,
            embedder,
            generator,
            dense_dir,
            keyword_dir,
            research,
        } = parts;

        let embedder_name = embedder.name().to_string();
        let generator_name = generator.name().to_string();

        let dense = DenseIndex::open(&dense_dir, embedder).await?;
        let keyword = KeywordIndex::new(keyword_dir, pages.clone());
        let retrievers = Arc::new(
            RetrieverSet::new()
                .with(Retriever::Dense(dense))
                .with(Retriever::Keyword(keyword))
                .with(Retriever::PageIndex(PageIndexLookup::new(pages.clone()))),
        );

        let builder = MemoryBuilder::new(pages.clone(), memory.clone(), generator.clone())
            .with_instructions(research.instructions.memory.clone());
        let research = ResearchLoop::new(
            pages.clone(),
            memory.clone(),
            retrievers.clone(),
            generator,
            research,
        );

        Ok(Self {
            store: None,
            pages,
            memory,
            retrievers,
            builder,
            research,
            chunker: default_chunker(),
            embedder_name,
            generator_name,
            gate: RwLock::new(()),
        })
    }

    pub fn with_chunker(mut self, chunker: Box<dyn Chunker>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn knowledge_store(&self) -> Option<&KnowledgeStore> {
        self.store.as_deref()
    }

    pub fn retrievers(&self) -> &RetrieverSet {
        &self.retrievers
    }

    // ========================================================================
    // Memory
    // ========================================================================

    pub async fn memorize(&self, text: &str) -> Result<Option<MemoryUpdate>> {
        let _gate = self.gate.read().await;
        self.builder.memorize(text).await
    }

    pub async fn memorize_batch(&self, texts: &[String]) -> Result<Vec<MemoryUpdate>> {
        let _gate = self.gate.read().await;
        self.builder.memorize_batch(texts).await
    }

    /// 긴 문서 수집: 청킹 → 배치 저장 → 인덱스 갱신
    pub async fn ingest_document(&self, text: &str) -> Result<Vec<MemoryUpdate>> {
        let chars = text.trim().chars().count();
        if chars < MIN_DOCUMENT_CHARS {
            return Err(Error::EmptyDocument {
                chars,
                min: MIN_DOCUMENT_CHARS,
            });
        }

        let _gate = self.gate.read().await;

        let chunks = self.chunker.chunk(text);
        tracing::info!(
            "Ingesting document: {} chars, {} chunks ({})",
            chars,
            chunks.len(),
            self.chunker.name()
        );

        let updates = self.builder.memorize_batch(&chunks).await?;
        self.retrievers.refresh(self.pages.as_ref()).await?;
        Ok(updates)
    }

    pub fn memory_state(&self) -> Result<MemoryState> {
        self.memory.load()
    }

    /// 앞에서부터 `limit`개 페이지 (인덱스 포함)
    pub fn pages(&self, limit: usize) -> Result<Vec<(usize, Page)>> {
        Ok(self.pages.load()?.into_iter().take(limit).enumerate().collect())
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// 저장소와 길이가 다른 인덱스만 갱신
    pub async fn refresh_indexes(&self) -> Result<Vec<RetrieverKind>> {
        let _gate = self.gate.read().await;
        self.retrievers.refresh(self.pages.as_ref()).await
    }

    pub async fn rebuild_indexes(&self) -> Result<()> {
        let _gate = self.gate.read().await;
        self.retrievers.rebuild(self.pages.as_ref()).await?;
        tracing::info!("All indexes rebuilt");
        Ok(())
    }

    // ========================================================================
    // Retrieval
    // ========================================================================

    /// 통합 없이 하이브리드 검색 (Dense + 키워드, RRF)
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        let _gate = self.gate.read().await;
        self.retrievers.refresh(self.pages.as_ref()).await?;

        let queries = vec![query.trim().to_string()];
        let mut hits = [Vec::new(), Vec::new()];
        for (slot, kind) in [RetrieverKind::Keyword, RetrieverKind::Dense].into_iter().enumerate() {
            if let Some(retriever) = self.retrievers.get(kind) {
                hits[slot] = retriever
                    .search(&queries, limit)
                    .await
                    .into_iter()
                    .flatten()
                    .collect();
            }
        }

        let [keyword, dense] = hits;
        let mut fused = reciprocal_rank_fusion(&keyword, &dense, &[], RRF_K);
        fused.truncate(limit);
        Ok(fused)
    }

    pub async fn research(&self, request: &str) -> Result<ResearchOutput> {
        let _gate = self.gate.read().await;
        self.research.research(request).await
    }

    pub async fn research_with(&self, request: &str, max_iters: usize) -> Result<ResearchOutput> {
        let _gate = self.gate.read().await;
        self.research.research_with(request, max_iters).await
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn stats(&self) -> Result<EngineStats> {
        let _gate = self.gate.read().await;

        let count = |kind| {
            self.retrievers
                .get(kind)
                .and_then(Retriever::indexed_count)
                .unwrap_or(0)
        };

        let dense_persisted = match self.retrievers.get(RetrieverKind::Dense) {
            Some(Retriever::Dense(index)) => index.persisted_count().await?,
            _ => 0,
        };

        Ok(EngineStats {
            page_count: self.pages.len()?,
            abstract_count: self.memory.load()?.abstracts.len(),
            dense_indexed: count(RetrieverKind::Dense),
            dense_persisted,
            keyword_indexed: count(RetrieverKind::Keyword),
            embedder: self.embedder_name.clone(),
            generator: self.generator_name.clone(),
            store: self.store.as_ref().map(|s| s.stats()).transpose()?,
        })
    }

    /// 저장소, 메모리, 모든 인덱스 초기화
    pub async fn clear_all(&self) -> Result<()> {
        let _gate = self.gate.write().await;

        self.pages.clear()?;
        self.memory.clear()?;
        self.retrievers.clear().await?;

        tracing::info!("Memory engine cleared");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::generation::testing::{Reply, ScriptedGenerator};
    use crate::knowledge::{HitSource, InMemoryMemoryStore, InMemoryPageStore};

    fn engine_parts(temp_dir: &TempDir, generator: Arc<ScriptedGenerator>) -> EngineParts {
        EngineParts {
            pages: Arc::new(InMemoryPageStore::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            embedder: Arc::new(HashingEmbedder::new(64)),
            generator,
            dense_dir: temp_dir.path().join("index/dense"),
            keyword_dir: temp_dir.path().join("index/keyword"),
            research: ResearchConfig::default(),
        }
    }

    fn scripted() -> Arc<ScriptedGenerator> {
        Arc::new(
            ScriptedGenerator::new()
                .on("search planning assistant", Reply::Json(json!({})))
                .on(
                    "EVIDENCE:",
                    Reply::Json(json!({"content": "Paris is the capital of France.", "sources": []})),
                )
                .on("judge whether", Reply::Json(json!({"enough": true})))
                .on("Rust", Reply::Text("Rust programming language".into()))
                .on("Paris", Reply::Text("Paris, capital of France".into())),
        )
    }

    async fn seeded(temp_dir: &TempDir) -> MemoryEngine {
        let engine = MemoryEngine::from_parts(engine_parts(temp_dir, scripted()))
            .await
            .unwrap();
        engine
            .memorize("Paris is the capital and largest city of France.")
            .await
            .unwrap();
        engine
            .memorize("Rust is a systems programming language focused on safety.")
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_search_returns_fused_hits() {
        let temp_dir = TempDir::new().unwrap();
        let engine = seeded(&temp_dir).await;

        let hits = engine.search("capital of France", 5).await.unwrap();
        assert_eq!(hits[0].page_id, "0");
        assert!(hits.iter().all(|h| h.source == HitSource::Hybrid));

        // 검색 전에 인덱스가 갱신됨
        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.page_count, 2);
        assert_eq!(stats.dense_indexed, 2);
        assert_eq!(stats.dense_persisted, 2);
        assert_eq!(stats.keyword_indexed, 2);
        assert!(stats.store.is_none());
    }

    #[tokio::test]
    async fn test_research_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let engine = seeded(&temp_dir).await;

        let output = engine.research("What is the capital of France?").await.unwrap();
        assert_eq!(output.iterations.len(), 1);
        assert_eq!(output.result.content, "Paris is the capital of France.");
        assert_eq!(output.iterations[0].fused_hits[0].page_id, "0");
    }

    #[tokio::test]
    async fn test_ingest_rejects_short_document() {
        let temp_dir = TempDir::new().unwrap();
        let engine = MemoryEngine::from_parts(engine_parts(&temp_dir, scripted()))
            .await
            .unwrap();

        let result = engine.ingest_document("too short").await;
        assert!(matches!(result, Err(Error::EmptyDocument { chars: 9, .. })));
        assert_eq!(engine.stats().await.unwrap().page_count, 0);
    }

    #[tokio::test]
    async fn test_ingest_chunks_and_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let generator = scripted();
        let engine = MemoryEngine::from_parts(engine_parts(&temp_dir, generator.clone()))
            .await
            .unwrap();

        // 2000자 윈도우, 200자 오버랩 → 3개 청크
        let document = "Paris ".repeat(800);
        let updates = engine.ingest_document(&document).await.unwrap();

        assert_eq!(updates.len(), 3);
        assert_eq!(generator.batch_calls(), 1);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.page_count, 3);
        assert_eq!(stats.dense_indexed, 3);
        assert_eq!(stats.keyword_indexed, 3);
        // 같은 추상은 한 번만 저장
        assert_eq!(stats.abstract_count, 1);
    }

    #[tokio::test]
    async fn test_clear_all_resets_everything() {
        let temp_dir = TempDir::new().unwrap();
        let engine = seeded(&temp_dir).await;
        engine.refresh_indexes().await.unwrap();

        engine.clear_all().await.unwrap();

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.page_count, 0);
        assert_eq!(stats.abstract_count, 0);
        assert_eq!(stats.dense_indexed, 0);
        assert_eq!(stats.dense_persisted, 0);
        assert_eq!(stats.keyword_indexed, 0);
        assert!(engine.search("Paris", 5).await.unwrap().is_empty());
        assert!(!temp_dir.path().join("index/keyword").exists());

        // 초기화 후 다시 쓰기 가능
        engine.memorize("Paris again, the capital of France.").await.unwrap();
        let hits = engine.search("Paris", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_indexes() {
        let temp_dir = TempDir::new().unwrap();
        let engine = seeded(&temp_dir).await;

        engine.rebuild_indexes().await.unwrap();
        assert!(engine.refresh_indexes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_without_api_key() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig::default().with_data_dir(temp_dir.path());
        let engine = MemoryEngine::open(&config).await.unwrap();

        // 생성 실패 → 원문 접두어로 저장
        let update = engine.memorize("Offline note about Paris.").await.unwrap().unwrap();
        assert_eq!(update.state.abstracts, vec!["Offline note about Paris."]);

        let stats = engine.stats().await.unwrap();
        assert_eq!(stats.generator, "disabled");
        assert_eq!(stats.embedder, "hashing");
        assert_eq!(
            stats.store.unwrap().db_path,
            temp_dir.path().join("knowledge.db")
        );
        assert_eq!(engine.pages(10).unwrap().len(), 1);

        engine.refresh_indexes().await.unwrap();
        assert!(config.dense_index_dir().exists());
        assert!(config.keyword_index_dir().join("index/keyword.db").exists());
        assert_eq!(engine.stats().await.unwrap().dense_persisted, 1);
    }
}
