//! Memory Builder - 입력 텍스트를 추상 + 페이지로 저장
//!
//! 1. 기존 추상 목록으로 컨텍스트 구성 (`Page {i}: {abstract}`)
//! 2. LLM으로 새 추상 생성 (실패하면 원문 앞 200자)
//! 3. 추상 추가 (중복 제거) → 페이지 추가

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::generation::{strip_think, Generation, Generator};
use crate::knowledge::{MemoryState, MemoryStore, Page, PageStore};

use super::prompts::{render, with_instructions, MEMORY_PROMPT};

/// 생성 실패 시 추상으로 쓰는 원문 길이 (문자 수)
pub const FALLBACK_ABSTRACT_CHARS: usize = 200;

/// memorize 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUpdate {
    /// 쓰기 이후 메모리 상태
    pub state: MemoryState,
    pub page: Page,
    pub page_index: usize,
}

pub struct MemoryBuilder {
    pages: Arc<dyn PageStore>,
    memory: Arc<dyn MemoryStore>,
    generator: Arc<dyn Generator>,
    instructions: Option<String>,
}

impl MemoryBuilder {
    pub fn new(
        pages: Arc<dyn PageStore>,
        memory: Arc<dyn MemoryStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            pages,
            memory,
            generator,
            instructions: None,
        }
    }

    /// 메모리 프롬프트 앞에 붙일 사용자 지시문
    pub fn with_instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    /// 텍스트 하나 저장. 빈 입력은 건너뛰고 `None`
    pub async fn memorize(&self, text: &str) -> Result<Option<MemoryUpdate>> {
        let text = text.trim();
        if text.is_empty() {
            tracing::warn!("Skipping blank input");
            return Ok(None);
        }

        let context = self.memory.load()?.to_context();
        let prompt = self.prompt(text, &context);

        let generated = self.generator.generate_single(&prompt, None).await;
        let abstract_text = abstract_or_fallback(text, generated);

        self.commit(text, &abstract_text).map(Some)
    }

    /// 여러 텍스트 저장
    ///
    /// 컨텍스트는 시작 시점 스냅샷 하나를 공유하고, 생성은 한 번의 배치 호출로 합니다.
    /// 쓰기는 배치 응답 이후 입력 순서대로 적용됩니다.
    pub async fn memorize_batch(&self, texts: &[String]) -> Result<Vec<MemoryUpdate>> {
        let inputs: Vec<&str> = texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| {
                if t.is_empty() {
                    tracing::warn!("Skipping blank input in batch");
                }
                !t.is_empty()
            })
            .collect();

        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let context = self.memory.load()?.to_context();
        let prompts: Vec<String> = inputs.iter().map(|t| self.prompt(t, &context)).collect();

        let mut generated = self.generator.generate_batch(&prompts).await.into_iter();
        if generated.len() != inputs.len() {
            tracing::warn!(
                "Batch generation returned {} results for {} inputs",
                generated.len(),
                inputs.len()
            );
        }

        let mut updates = Vec::with_capacity(inputs.len());
        for text in inputs {
            let result = generated
                .next()
                .unwrap_or_else(|| Err(crate::error::Error::generation("missing batch result")));
            let abstract_text = abstract_or_fallback(text, result);
            updates.push(self.commit(text, &abstract_text)?);
        }

        tracing::info!("Memorized {} inputs in one batch", updates.len());
        Ok(updates)
    }

    fn prompt(&self, text: &str, context: &str) -> String {
        let prompt = render(
            MEMORY_PROMPT,
            &[("memory_context", context), ("input_message", text)],
        );
        with_instructions(self.instructions.as_deref(), prompt)
    }

    fn commit(&self, text: &str, abstract_text: &str) -> Result<MemoryUpdate> {
        self.memory.add(abstract_text)?;

        let header = format!("[ABSTRACT] {}", abstract_text).trim().to_string();
        let decorated = format!("{}; {}", header, text);
        let page = Page::new(header, text).with_meta("decorated", decorated);

        let page_index = self.pages.add(page.clone())?;
        tracing::debug!("Stored page {}", page_index);

        Ok(MemoryUpdate {
            state: self.memory.load()?,
            page,
            page_index,
        })
    }
}

fn abstract_or_fallback(text: &str, generated: Result<Generation>) -> String {
    match generated {
        Ok(generation) => {
            let abstract_text = strip_think(&generation.text);
            if abstract_text.is_empty() {
                tracing::warn!("Empty abstract generated, using text prefix");
                fallback_abstract(text)
            } else {
                abstract_text
            }
        }
        Err(e) => {
            tracing::warn!("Abstract generation failed ({}), using text prefix", e);
            fallback_abstract(text)
        }
    }
}

fn fallback_abstract(text: &str) -> String {
    text.chars().take(FALLBACK_ABSTRACT_CHARS).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::testing::{Reply, ScriptedGenerator};
    use crate::knowledge::{InMemoryMemoryStore, InMemoryPageStore};

    struct Fixture {
        pages: Arc<InMemoryPageStore>,
        memory: Arc<InMemoryMemoryStore>,
        generator: Arc<ScriptedGenerator>,
        builder: MemoryBuilder,
    }

    fn fixture(generator: ScriptedGenerator) -> Fixture {
        let pages = Arc::new(InMemoryPageStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let generator = Arc::new(generator);
        let builder = MemoryBuilder::new(pages.clone(), memory.clone(), generator.clone());
        Fixture {
            pages,
            memory,
            generator,
            builder,
        }
    }

    #[tokio::test]
    async fn test_memorize_writes_abstract_and_page() {
        let f = fixture(
            ScriptedGenerator::new().on("Paris", Reply::Text("Paris is the capital of France.".into())),
        );

        let update = f
            .builder
            .memorize("  Paris is the capital and largest city of France.  ")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(update.page_index, 0);
        assert_eq!(update.state.abstracts, vec!["Paris is the capital of France."]);
        assert_eq!(update.page.header, "[ABSTRACT] Paris is the capital of France.");
        assert_eq!(update.page.content, "Paris is the capital and largest city of France.");
        assert_eq!(
            update.page.metadata["decorated"],
            "[ABSTRACT] Paris is the capital of France.; Paris is the capital and largest city of France."
        );
        assert_eq!(f.pages.len().unwrap(), 1);

        // 첫 호출의 컨텍스트
        assert!(f.generator.prompts()[0].contains("No memory currently."));
    }

    #[tokio::test]
    async fn test_memorize_falls_back_to_prefix() {
        let f = fixture(ScriptedGenerator::new().on("NEW CONTENT", Reply::Fail("down".into())));
        let text = "x".repeat(500);

        let update = f.builder.memorize(&text).await.unwrap().unwrap();
        assert_eq!(update.state.abstracts[0].len(), FALLBACK_ABSTRACT_CHARS);
        assert_eq!(update.page.content.len(), 500);
    }

    #[tokio::test]
    async fn test_memorize_empty_answer_falls_back() {
        let f = fixture(ScriptedGenerator::new().on("NEW CONTENT", Reply::Text("<think>hm</think>".into())));
        let update = f.builder.memorize("short note").await.unwrap().unwrap();
        assert_eq!(update.state.abstracts, vec!["short note"]);
    }

    #[tokio::test]
    async fn test_context_lists_existing_abstracts() {
        let f = fixture(
            ScriptedGenerator::new()
                .once("NEW CONTENT", Reply::Text("first".into()))
                .once("NEW CONTENT", Reply::Text("second".into())),
        );

        f.builder.memorize("one").await.unwrap();
        f.builder.memorize("two").await.unwrap();

        let prompts = f.generator.prompts();
        assert!(prompts[1].contains("Page 0: first"));
        assert_eq!(f.memory.load().unwrap().abstracts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_duplicate_abstract_still_adds_page() {
        let f = fixture(ScriptedGenerator::new().on("NEW CONTENT", Reply::Text("same".into())));
        f.builder.memorize("a").await.unwrap();
        f.builder.memorize("b").await.unwrap();

        assert_eq!(f.memory.load().unwrap().abstracts, vec!["same"]);
        assert_eq!(f.pages.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_blank_input_skipped() {
        let f = fixture(ScriptedGenerator::new());
        assert!(f.builder.memorize("   ").await.unwrap().is_none());
        assert!(f.generator.prompts().is_empty());
        assert_eq!(f.pages.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_shares_snapshot_and_keeps_order() {
        let f = fixture(
            ScriptedGenerator::new()
                .on("alpha text", Reply::Text("alpha".into()))
                .on("beta text", Reply::Fail("rate limited".into()))
                .on("gamma text", Reply::Text("gamma".into())),
        );
        f.memory.add("existing").unwrap();

        let texts = vec![
            "alpha text".to_string(),
            " ".to_string(),
            "beta text".to_string(),
            "gamma text".to_string(),
        ];
        let updates = f.builder.memorize_batch(&texts).await.unwrap();

        assert_eq!(f.generator.batch_calls(), 1);
        let indices: Vec<usize> = updates.iter().map(|u| u.page_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);

        // 실패한 항목만 원문 접두어
        assert_eq!(
            f.memory.load().unwrap().abstracts,
            vec!["existing", "alpha", "beta text", "gamma"]
        );

        // 모든 프롬프트가 같은 스냅샷을 봄
        for prompt in f.generator.prompts() {
            assert!(prompt.contains("Page 0: existing"));
            assert!(!prompt.contains("Page 1:"));
        }
    }

    #[tokio::test]
    async fn test_instructions_prefix() {
        let pages = Arc::new(InMemoryPageStore::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let generator = Arc::new(ScriptedGenerator::new().on("NEW CONTENT", Reply::Text("a".into())));
        let builder = MemoryBuilder::new(pages, memory, generator.clone())
            .with_instructions(Some("Use Korean".into()));

        builder.memorize("text").await.unwrap();
        assert!(generator.prompts()[0].starts_with("User Instructions: Use Korean"));
    }
}
