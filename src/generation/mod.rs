//! 생성 모듈 - LLM 호출
//!
//! 메모리 빌더와 리서치 루프가 사용하는 생성 백엔드 인터페이스입니다.
//!
//! - [`OpenAiGenerator`]: OpenAI 호환 `/chat/completions` (기본: Groq)
//!
//! 구조화 호출은 JSON 스키마를 함께 보내고, 응답은 [`Generation::parse`]로
//! 타입이 있는 값으로 엄격하게 변환합니다.

mod openai;

use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

pub use openai::{OpenAiConfig, OpenAiGenerator, DEFAULT_BASE_URL, DEFAULT_MODEL};

// ============================================================================
// Types
// ============================================================================

/// 생성 결과
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    /// 원문 응답
    pub text: String,
    /// 구조화 응답 (스키마 호출이고 파싱에 성공한 경우)
    pub json: Option<Value>,
}

impl Generation {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            json: None,
        }
    }

    /// 타입 변환. `json`이 없으면 원문에서 JSON을 찾아 파싱
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.json {
            Some(value) => value.clone(),
            None => extract_json(&self.text)?,
        };
        Ok(serde_json::from_value(value)?)
    }
}

// ============================================================================
// Generator Trait
// ============================================================================

#[async_trait]
pub trait Generator: Send + Sync {
    /// 단일 프롬프트. `schema`가 있으면 구조화 응답을 요청
    async fn generate_single(&self, prompt: &str, schema: Option<&Value>) -> Result<Generation>;

    /// 여러 프롬프트. 결과는 입력 순서와 같고 항목별로 성공/실패가 나뉨
    ///
    /// 기본 구현은 단일 호출을 동시에 실행합니다.
    async fn generate_batch(&self, prompts: &[String]) -> Vec<Result<Generation>> {
        join_all(prompts.iter().map(|p| self.generate_single(p, None))).await
    }

    fn name(&self) -> &str;
}

/// API 키가 없을 때 쓰는 생성기. 모든 호출이 `Config` 에러
#[derive(Debug, Clone)]
pub struct DisabledGenerator {
    reason: String,
}

impl DisabledGenerator {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate_single(&self, _prompt: &str, _schema: Option<&Value>) -> Result<Generation> {
        Err(Error::Config(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

// ============================================================================
// Response Helpers
// ============================================================================

/// `<think>...</think>` 블록 제거
pub fn strip_think(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            // 닫히지 않은 블록은 끝까지 버림
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);

    out.trim().to_string()
}

/// 응답 원문에서 JSON 객체 추출
///
/// think 블록과 코드 펜스를 걷어낸 뒤 첫 `{`부터 마지막 `}`까지를 파싱합니다.
pub fn extract_json(text: &str) -> Result<Value> {
    let cleaned = strip_think(text);

    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => {
            Ok(serde_json::from_str(&cleaned[start..=end])?)
        }
        _ => Err(Error::Generation(format!(
            "no JSON object in response: {}",
            cleaned.chars().take(200).collect::<String>()
        ))),
    }
}

// ============================================================================
// Test Support
// ============================================================================


// ============================================================================
// Tests
// ============================================================================
