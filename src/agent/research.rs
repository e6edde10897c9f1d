//! Research Loop - PLAN → SEARCH → INTEGRATE → REFLECT
//!
//! 최대 `max_iters`번 반복합니다. 각 단계의 실패는 정해진 대체값으로 복구되어
//! `research()` 자체는 인덱스 갱신 실패 외에는 에러를 내지 않습니다.
//!
//! - 메모리 로드 실패 → 빈 메모리로 계획
//! - PLAN 실패 → 빈 계획 (기본 도구로 검색)
//! - 검색 결과 없음 → 원래 요청으로 Dense 검색 (top 3), 그래도 없으면 이전 결과 유지
//! - INTEGRATE 실패 → 이전 결과 유지
//! - REFLECT 실패 → `enough = true`
//! - 마지막 반복에서는 후속 질문 생성 생략

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::generation::Generator;
use crate::knowledge::{
    reciprocal_rank_fusion, Hit, MemoryState, MemoryStore, PageStore, RetrieverKind, RetrieverSet,
    RRF_K,
};

use super::plan::{
    follow_up_schema, info_check_schema, integrate_schema, planning_schema, CompletenessCheck,
    FollowUpRequests, IntegratedAnswer, SearchPlan,
};
use super::prompts::{
    render, with_instructions, StageInstructions, FOLLOW_UP_PROMPT, INFO_CHECK_PROMPT,
    INTEGRATE_PROMPT, PLANNING_PROMPT,
};

/// 검색기별 top_k
pub const SEARCH_TOP_K: usize = 10;
/// 통합 후보로 넘기는 융합 결과 수
pub const FUSED_TOP_N: usize = 8;
/// 결과가 없을 때 Dense 재검색 top_k
pub const FALLBACK_TOP_K: usize = 3;
/// 통합 프롬프트에 넣는 근거 수
pub const EVIDENCE_HITS: usize = 2;
/// 근거 스니펫 최대 길이 (문자 수)
pub const SNIPPET_CHARS: usize = 150;
/// Shortcut 정책에서 충분하다고 보는 최소 길이
pub const SHORTCUT_MIN_CHARS: usize = 20;

// ============================================================================
// Types
// ============================================================================

/// 근거 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMetadata {
    pub page_id: String,
    pub relevance_score: f64,
    pub snippet: String,
    pub source_type: String,
}

/// 누적 답변
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResearchResult {
    pub content: String,
    pub sources: Vec<String>,
    pub retrieval_metadata: Vec<RetrievalMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionDecision {
    pub enough: bool,
    pub new_request: Option<String>,
}

impl ReflectionDecision {
    fn enough() -> Self {
        Self {
            enough: true,
            new_request: None,
        }
    }
}

/// 반복 한 번의 기록
#[derive(Debug, Clone, Serialize)]
pub struct IterationTrace {
    pub step: usize,
    pub request: String,
    pub plan: SearchPlan,
    pub fused_hits: Vec<Hit>,
    pub result: ResearchResult,
    pub decision: ReflectionDecision,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResearchOutput {
    pub session_id: Uuid,
    pub result: ResearchResult,
    pub iterations: Vec<IterationTrace>,
}

/// REFLECT 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionPolicy {
    /// 완결성 판단 + 후속 질문 생성
    #[default]
    Judge,
    /// 답변이 일정 길이를 넘으면 충분
    Shortcut,
}

impl fmt::Display for ReflectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReflectionPolicy::Judge => f.write_str("judge"),
            ReflectionPolicy::Shortcut => f.write_str("shortcut"),
        }
    }
}

impl FromStr for ReflectionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "judge" => Ok(ReflectionPolicy::Judge),
            "shortcut" => Ok(ReflectionPolicy::Shortcut),
            other => Err(Error::Config(format!("unknown reflection policy: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub max_iters: usize,
    pub reflection: ReflectionPolicy,
    pub instructions: StageInstructions,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_iters: 1,
            reflection: ReflectionPolicy::default(),
            instructions: StageInstructions::default(),
        }
    }
}

// ============================================================================
// ResearchLoop
// ============================================================================

/// 세션별 상태(계획, 결과)는 `research()` 호출 안에만 존재합니다.
pub struct ResearchLoop {
    pages: Arc<dyn PageStore>,
    memory: Arc<dyn MemoryStore>,
    retrievers: Arc<RetrieverSet>,
    generator: Arc<dyn Generator>,
    config: ResearchConfig,
}

impl ResearchLoop {
    pub fn new(
        pages: Arc<dyn PageStore>,
        memory: Arc<dyn MemoryStore>,
        retrievers: Arc<RetrieverSet>,
        generator: Arc<dyn Generator>,
        config: ResearchConfig,
    ) -> Self {
        Self {
            pages,
            memory,
            retrievers,
            generator,
            config,
        }
    }

    pub fn config(&self) -> &ResearchConfig {
        &self.config
    }

    pub async fn research(&self, request: &str) -> Result<ResearchOutput> {
        self.research_with(request, self.config.max_iters).await
    }

    /// 반복 횟수를 지정해 실행 (최소 1회)
    pub async fn research_with(&self, request: &str, max_iters: usize) -> Result<ResearchOutput> {
        let session_id = Uuid::new_v4();
        let request = request.trim();

        // 인덱스 드리프트 갱신 (실패는 전파)
        self.retrievers.refresh(self.pages.as_ref()).await?;

        let mut result = ResearchResult::default();
        let mut iterations = Vec::new();
        let mut next_request = request.to_string();

        let max_iters = max_iters.max(1);
        for step in 0..max_iters {
            tracing::debug!("[{}] iteration {}: {}", session_id, step, next_request);

            let memory = match self.memory.load() {
                Ok(memory) => memory,
                Err(e) => {
                    tracing::warn!("Memory load failed, planning without abstracts: {}", e);
                    MemoryState::default()
                }
            };

            // PLAN
            let plan = match self.plan(&next_request, &memory).await {
                Ok(plan) => plan,
                Err(e) => {
                    tracing::warn!("Planning failed, using empty plan: {}", e);
                    SearchPlan::default()
                }
            };

            // SEARCH
            let mut fused = self.search(&plan, &next_request).await;
            if fused.is_empty() {
                tracing::debug!("No fused hits, falling back to dense search");
                fused = self.dense_fallback(request).await;
            }

            // INTEGRATE
            if !fused.is_empty() {
                match self.integrate(&fused, &result, request).await {
                    Ok(updated) => result = updated,
                    Err(e) => tracing::warn!("Integration failed, keeping previous result: {}", e),
                }
            }

            // REFLECT
            let last = step + 1 == max_iters;
            let decision = match self.reflect(request, &result, last).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!("Reflection failed, stopping: {}", e);
                    ReflectionDecision::enough()
                }
            };

            iterations.push(IterationTrace {
                step,
                request: next_request.clone(),
                plan,
                fused_hits: fused,
                result: result.clone(),
                decision: decision.clone(),
            });

            if decision.enough {
                break;
            }

            next_request = decision
                .new_request
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| request.to_string());
        }

        tracing::info!(
            "Research session {} finished after {} iteration(s)",
            session_id,
            iterations.len()
        );

        Ok(ResearchOutput {
            session_id,
            result,
            iterations,
        })
    }

    // ========================================================================
    // PLAN
    // ========================================================================

    async fn plan(&self, request: &str, memory: &MemoryState) -> Result<SearchPlan> {
        let prompt = render(
            PLANNING_PROMPT,
            &[("request", request), ("memory", &memory.to_context())],
        );
        let prompt = with_instructions(self.config.instructions.planning.as_deref(), prompt);

        let generation = self
            .generator
            .generate_single(&prompt, Some(&planning_schema()))
            .await
            .map_err(|e| Error::Planning(e.to_string()))?;

        generation
            .parse::<SearchPlan>()
            .map_err(|e| Error::Planning(e.to_string()))
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// 계획대로 검색하고 RRF로 통합 (상위 8개)
    pub async fn search(&self, plan: &SearchPlan, sub_query: &str) -> Vec<Hit> {
        let mut plan = plan.clone();
        if plan.tools.is_empty() {
            plan.tools = vec![RetrieverKind::Dense, RetrieverKind::Keyword];
        }
        if plan.uses(RetrieverKind::Dense) && plan.vector_queries.is_empty() {
            plan.vector_queries = vec![sub_query.to_string()];
        }
        if plan.uses(RetrieverKind::Keyword) && plan.keyword_queries.is_empty() {
            plan.keyword_queries = vec![sub_query.to_string()];
        }

        let mut keyword_hits = Vec::new();
        let mut dense_hits = Vec::new();
        let mut page_index_hits = Vec::new();

        if plan.uses(RetrieverKind::Keyword) {
            // 키워드 질의는 하나로 합쳐 검색
            let combined = plan.keyword_queries.join(" ");
            keyword_hits = self
                .run(RetrieverKind::Keyword, &[combined], SEARCH_TOP_K)
                .await;
        }

        if plan.uses(RetrieverKind::Dense) {
            dense_hits = self
                .run(RetrieverKind::Dense, &plan.vector_queries, SEARCH_TOP_K)
                .await;
        }

        if plan.uses(RetrieverKind::PageIndex) && !plan.page_indices.is_empty() {
            let queries: Vec<String> = plan.page_indices.iter().map(|i| i.to_string()).collect();
            page_index_hits = self
                .run(RetrieverKind::PageIndex, &queries, plan.page_indices.len())
                .await;
        }

        tracing::debug!(
            "Search hits: keyword={}, dense={}, page_index={}",
            keyword_hits.len(),
            dense_hits.len(),
            page_index_hits.len()
        );

        let mut fused = reciprocal_rank_fusion(&keyword_hits, &dense_hits, &page_index_hits, RRF_K);
        fused.truncate(FUSED_TOP_N);
        fused
    }

    /// 검색기 실행 후 결과 목록 평탄화. 검색기가 없으면 빈 결과
    async fn run(&self, kind: RetrieverKind, queries: &[String], top_k: usize) -> Vec<Hit> {
        match self.retrievers.get(kind) {
            Some(retriever) => retriever
                .search(queries, top_k)
                .await
                .into_iter()
                .flatten()
                .collect(),
            None => {
                tracing::debug!("No {} retriever configured", kind);
                vec![]
            }
        }
    }

    async fn dense_fallback(&self, request: &str) -> Vec<Hit> {
        self.run(RetrieverKind::Dense, &[request.to_string()], FALLBACK_TOP_K)
            .await
    }

    // ========================================================================
    // INTEGRATE
    // ========================================================================

    async fn integrate(
        &self,
        hits: &[Hit],
        previous: &ResearchResult,
        question: &str,
    ) -> Result<ResearchResult> {
        let mut evidence = Vec::new();
        let mut sources = Vec::new();
        let mut metadata = Vec::new();

        for (i, hit) in hits.iter().take(EVIDENCE_HITS).enumerate() {
            let snippet = truncate_snippet(&hit.snippet);
            evidence.push(format!("{}. [{}]({}) {}", i + 1, hit.source, hit.page_id, snippet));

            sources.push(hit.page_id.clone());
            metadata.push(RetrievalMetadata {
                page_id: hit.page_id.clone(),
                relevance_score: hit.meta.score,
                snippet,
                source_type: hit.source.to_string(),
            });
        }

        let evidence_context = if evidence.is_empty() {
            "No search results".to_string()
        } else {
            evidence.join("\n")
        };
        let previous_content = if previous.content.is_empty() {
            "No previous information."
        } else {
            previous.content.as_str()
        };

        let prompt = render(
            INTEGRATE_PROMPT,
            &[
                ("question", question),
                ("evidence_context", &evidence_context),
                ("result", previous_content),
            ],
        );
        let prompt = with_instructions(self.config.instructions.integration.as_deref(), prompt);

        let generation = self
            .generator
            .generate_single(&prompt, Some(&integrate_schema()))
            .await
            .map_err(|e| Error::Integration(e.to_string()))?;
        let answer: IntegratedAnswer = generation
            .parse()
            .map_err(|e| Error::Integration(e.to_string()))?;

        let llm_sources = answer.source_ids();
        if !llm_sources.is_empty() {
            sources = llm_sources;
        }

        Ok(ResearchResult {
            content: answer.content,
            sources,
            retrieval_metadata: metadata,
        })
    }

    // ========================================================================
    // REFLECT
    // ========================================================================

    /// `last`가 참이면 다음 반복이 없으므로 후속 질문을 만들지 않음
    async fn reflect(
        &self,
        request: &str,
        result: &ResearchResult,
        last: bool,
    ) -> Result<ReflectionDecision> {
        match self.config.reflection {
            ReflectionPolicy::Shortcut => Ok(shortcut_decision(result)),
            ReflectionPolicy::Judge => self.judge(request, result, last).await,
        }
    }

    async fn judge(
        &self,
        request: &str,
        result: &ResearchResult,
        last: bool,
    ) -> Result<ReflectionDecision> {
        let vars = [("request", request), ("result", result.content.as_str())];
        let instructions = self.config.instructions.reflection.as_deref();

        let prompt = with_instructions(instructions, render(INFO_CHECK_PROMPT, &vars));
        let check: CompletenessCheck = self
            .generator
            .generate_single(&prompt, Some(&info_check_schema()))
            .await
            .and_then(|g| g.parse())
            .map_err(|e| Error::Reflection(e.to_string()))?;

        if check.enough {
            return Ok(ReflectionDecision::enough());
        }
        if last {
            tracing::debug!("Final iteration, skipping follow-up generation");
            return Ok(ReflectionDecision {
                enough: false,
                new_request: None,
            });
        }

        let prompt = with_instructions(instructions, render(FOLLOW_UP_PROMPT, &vars));
        let follow_up: FollowUpRequests = self
            .generator
            .generate_single(&prompt, Some(&follow_up_schema()))
            .await
            .and_then(|g| g.parse())
            .map_err(|e| Error::Reflection(e.to_string()))?;

        Ok(ReflectionDecision {
            enough: false,
            new_request: follow_up.first(),
        })
    }
}

fn shortcut_decision(result: &ResearchResult) -> ReflectionDecision {
    ReflectionDecision {
        enough: result.content.trim().chars().count() > SHORTCUT_MIN_CHARS,
        new_request: None,
    }
}

fn truncate_snippet(snippet: &str) -> String {
    if snippet.chars().count() > SNIPPET_CHARS {
        let head: String = snippet.chars().take(SNIPPET_CHARS).collect();
        format!("{}...", head)
    } else {
        snippet.to_string()
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
    use crate::embedding::HashingEmbedder;
    use crate::generation::testing::{Reply, ScriptedGenerator};
    use crate::knowledge::{
        DenseIndex, HitSource, InMemoryMemoryStore, InMemoryPageStore, KeywordIndex, Page,
        PageIndexLookup, Retriever,
    };

    const PLAN: &str = "search planning assistant";
    const INTEGRATE: &str = "EVIDENCE:";
    const CHECK: &str = "judge whether the collected information";
    const FOLLOW_UP: &str = "follow-up retrieval questions";

    struct Fixture {
        _temp_dir: TempDir,
        pages: Arc<InMemoryPageStore>,
        memory: Arc<InMemoryMemoryStore>,
        retrievers: Arc<RetrieverSet>,
    }

    async fn fixture(contents: &[&str]) -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let pages = Arc::new(InMemoryPageStore::with_pages(
            contents
                .iter()
                .map(|c| Page::new(format!("[ABSTRACT] {}", c), *c))
                .collect(),
        ));
        let memory = Arc::new(InMemoryMemoryStore::new());

        let retrievers = RetrieverSet::new()
            .with(Retriever::Dense(
                DenseIndex::open(&temp_dir.path().join("dense"), Arc::new(HashingEmbedder::new(64)))
                    .await
                    .unwrap(),
            ))
            .with(Retriever::Keyword(KeywordIndex::new(
                temp_dir.path().join("keyword"),
                pages.clone(),
            )))
            .with(Retriever::PageIndex(PageIndexLookup::new(pages.clone())));

        Fixture {
            _temp_dir: temp_dir,
            pages,
            memory,
            retrievers: Arc::new(retrievers),
        }
    }

    impl Fixture {
        fn research_loop(&self, generator: Arc<ScriptedGenerator>, config: ResearchConfig) -> ResearchLoop {
            ResearchLoop::new(
                self.pages.clone(),
                self.memory.clone(),
                self.retrievers.clone(),
                generator,
                config,
            )
        }
    }

    fn answer(content: &str, sources: &[&str]) -> Reply {
        Reply::Json(json!({"content": content, "sources": sources}))
    }

    fn enough(value: bool) -> Reply {
        Reply::Json(json!({"enough": value}))
    }

    #[tokio::test]
    async fn test_single_iteration_runs_one_cycle() {
        let f = fixture(&["Paris is the capital of France", "Rust is a systems language"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({"tools": ["dense"], "vector_queries": ["capital"]})))
                .on(INTEGRATE, answer("Paris is the capital of France.", &[]))
                .on(CHECK, enough(false))
                .on(FOLLOW_UP, Reply::Json(json!({"new_requests": ["more?"]}))),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research("anything")
            .await
            .unwrap();

        assert_eq!(output.iterations.len(), 1);
        assert_eq!(generator.prompts_containing(PLAN).len(), 1);
        assert_eq!(generator.prompts_containing(INTEGRATE).len(), 1);
        assert_eq!(generator.prompts_containing(CHECK).len(), 1);
        assert!(generator.prompts_containing(FOLLOW_UP).is_empty());
        assert!(!output.iterations[0].decision.enough);
        assert_eq!(output.iterations[0].decision.new_request, None);
        assert_eq!(output.result.content, "Paris is the capital of France.");
    }

    #[tokio::test]
    async fn test_memory_load_failure_plans_without_abstracts() {
        struct BrokenMemory;

        impl MemoryStore for BrokenMemory {
            fn load(&self) -> Result<MemoryState> {
                Err(Error::Corrupt("memory table unreadable".into()))
            }

            fn add(&self, _abstract_text: &str) -> Result<bool> {
                Err(Error::Corrupt("memory table unreadable".into()))
            }

            fn save(&self, _state: &MemoryState) -> Result<()> {
                Ok(())
            }

            fn clear(&self) -> Result<()> {
                Ok(())
            }
        }

        let f = fixture(&["Paris is the capital of France"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .on(INTEGRATE, answer("Paris is the capital of France.", &[]))
                .on(CHECK, enough(true)),
        );
        let research = ResearchLoop::new(
            f.pages.clone(),
            Arc::new(BrokenMemory),
            f.retrievers.clone(),
            generator.clone(),
            ResearchConfig::default(),
        );

        let output = research.research("capital of France").await.unwrap();

        assert_eq!(output.iterations.len(), 1);
        assert_eq!(output.result.content, "Paris is the capital of France.");
        assert_eq!(generator.prompts_containing(PLAN).len(), 1);
    }

    #[tokio::test]
    async fn test_planning_failure_uses_default_tools() {
        let f = fixture(&["Paris is the capital of France", "Python is a language"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Fail("backend down".into()))
                .on(INTEGRATE, answer("Paris.", &[]))
                .on(CHECK, enough(true)),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research("capital France")
            .await
            .unwrap();

        let trace = &output.iterations[0];
        assert_eq!(trace.plan, SearchPlan::default());
        assert!(!trace.fused_hits.is_empty());
        assert!(trace.fused_hits.iter().all(|h| h.source == HitSource::Hybrid));
        assert_eq!(output.result.content, "Paris.");
    }

    #[tokio::test]
    async fn test_paris_scenario_top_hit() {
        let f = fixture(&[
            "Paris is the capital of France and its largest city.",
            "Machine learning trains models on data.",
            "Python is a popular programming language.",
        ])
        .await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(
                    PLAN,
                    Reply::Json(json!({
                        "info_needs": ["capital of France"],
                        "tools": ["dense", "bm25"],
                        "keyword_collection": ["capital France"],
                        "vector_queries": ["capital of France"],
                        "page_index": []
                    })),
                )
                .on(INTEGRATE, answer("The capital of France is Paris.", &["0"]))
                .on(CHECK, enough(true)),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research("capital of France")
            .await
            .unwrap();

        let trace = &output.iterations[0];
        assert_eq!(trace.fused_hits[0].page_id, "0");
        assert_eq!(output.result.sources, vec!["0"]);
        assert_eq!(output.result.retrieval_metadata[0].page_id, "0");
        assert_eq!(output.result.retrieval_metadata[0].source_type, "hybrid");

        let integrate_prompt = &generator.prompts_containing(INTEGRATE)[0];
        assert!(integrate_prompt.contains("1. [hybrid](0) Paris is the capital"));
        assert!(integrate_prompt.contains("No previous information."));
    }

    #[tokio::test]
    async fn test_integration_failure_keeps_previous_result() {
        let f = fixture(&["Paris is the capital of France"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .once(INTEGRATE, answer("First answer about Paris.", &[]))
                .on(INTEGRATE, Reply::Text("not json at all".into()))
                .on(CHECK, enough(false))
                .on(FOLLOW_UP, Reply::Json(json!({"new_requests": []}))),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research_with("Paris", 2)
            .await
            .unwrap();

        assert_eq!(output.iterations.len(), 2);
        assert_eq!(output.iterations[0].result.content, "First answer about Paris.");
        assert_eq!(output.iterations[1].result, output.iterations[0].result);
        assert_eq!(output.result.content, "First answer about Paris.");

        // 빈 new_request → 원래 요청으로 재시도
        assert_eq!(output.iterations[1].request, "Paris");
        // 두 번째 통합은 이전 결과를 봄
        let prompts = generator.prompts_containing(INTEGRATE);
        assert!(prompts[1].contains("First answer about Paris."));
    }

    #[tokio::test]
    async fn test_judge_produces_new_request() {
        let f = fixture(&["Paris is the capital of France", "The Eiffel Tower opened in 1889"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .on(INTEGRATE, answer("Paris is the capital.", &[]))
                .once(CHECK, enough(false))
                .on(CHECK, enough(true))
                .on(
                    FOLLOW_UP,
                    Reply::Text(
                        "<think>tower date missing</think>{\"new_requests\": [\"When did the Eiffel Tower open?\", \"b\"]}"
                            .into(),
                    ),
                ),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research_with("Tell me about Paris", 3)
            .await
            .unwrap();

        assert_eq!(output.iterations.len(), 2);
        assert_eq!(
            output.iterations[0].decision.new_request.as_deref(),
            Some("When did the Eiffel Tower open?")
        );
        assert_eq!(output.iterations[1].request, "When did the Eiffel Tower open?");
        assert!(output.iterations[1].decision.enough);

        // 두 번째 계획은 후속 질문으로
        let plans = generator.prompts_containing(PLAN);
        assert!(plans[1].contains("When did the Eiffel Tower open?"));
        // 통합 질문은 항상 원래 요청
        assert!(generator.prompts_containing(INTEGRATE)[1].contains("Tell me about Paris"));
    }

    #[tokio::test]
    async fn test_reflection_failure_stops() {
        let f = fixture(&["Paris is the capital of France"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .on(INTEGRATE, answer("Paris.", &[]))
                .on(CHECK, Reply::Fail("timeout".into())),
        );

        let output = f
            .research_loop(generator, ResearchConfig::default())
            .research_with("Paris", 5)
            .await
            .unwrap();

        assert_eq!(output.iterations.len(), 1);
        assert!(output.iterations[0].decision.enough);
    }

    #[tokio::test]
    async fn test_shortcut_policy() {
        let f = fixture(&["Paris is the capital of France"]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .once(INTEGRATE, answer("short", &[]))
                .on(INTEGRATE, answer("Paris is the capital city of France.", &[])),
        );
        let config = ResearchConfig {
            max_iters: 3,
            reflection: ReflectionPolicy::Shortcut,
            ..Default::default()
        };

        let output = f.research_loop(generator.clone(), config).research("Paris").await.unwrap();

        assert_eq!(output.iterations.len(), 2);
        assert!(!output.iterations[0].decision.enough);
        assert!(output.iterations[1].decision.enough);
        assert!(generator.prompts_containing(CHECK).is_empty());
    }

    #[tokio::test]
    async fn test_empty_repository_carries_result_forward() {
        let f = fixture(&[]).await;
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(PLAN, Reply::Json(json!({})))
                .on(CHECK, enough(true)),
        );

        let output = f
            .research_loop(generator.clone(), ResearchConfig::default())
            .research("anything")
            .await
            .unwrap();

        assert_eq!(output.result, ResearchResult::default());
        assert!(output.iterations[0].fused_hits.is_empty());
        assert!(generator.prompts_containing(INTEGRATE).is_empty());
    }

    #[tokio::test]
    async fn test_page_index_hits_are_fused() {
        let f = fixture(&["alpha", "beta", "gamma"]).await;
        let generator = Arc::new(ScriptedGenerator::new());
        let research = f.research_loop(generator, ResearchConfig::default());

        let plan = SearchPlan {
            tools: vec![RetrieverKind::PageIndex],
            page_indices: vec![2, 9],
            ..Default::default()
        };
        let fused = research.search(&plan, "ignored").await;

        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].page_id, "2");
        assert!((fused[0].meta.score - 2.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_truncate_snippet() {
        assert_eq!(truncate_snippet("short"), "short");
        let long = "a".repeat(200);
        let out = truncate_snippet(&long);
        assert_eq!(out.len(), SNIPPET_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Judge".parse::<ReflectionPolicy>().unwrap(), ReflectionPolicy::Judge);
        assert_eq!("shortcut".parse::<ReflectionPolicy>().unwrap(), ReflectionPolicy::Shortcut);
        assert!("always".parse::<ReflectionPolicy>().is_err());
    }
}
