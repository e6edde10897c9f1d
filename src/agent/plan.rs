//! 구조화 LLM 응답 타입과 JSON 스키마
//!
//! 각 호출 지점마다 타입을 하나씩 두고 엄격하게 파싱합니다.
//! 파싱 실패 시 대체값은 호출하는 쪽(리서치 루프)이 정합니다.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::knowledge::RetrieverKind;

/// 후속 질문 최대 개수
pub const MAX_NEW_REQUESTS: usize = 5;

// ============================================================================
// SearchPlan
// ============================================================================

/// 검색 계획
///
/// 프롬프트의 `keyword_collection` / `page_index` 키도 받습니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPlan {
    #[serde(default)]
    pub info_needs: Vec<String>,
    #[serde(default)]
    pub tools: Vec<RetrieverKind>,
    #[serde(default, alias = "keyword_collection")]
    pub keyword_queries: Vec<String>,
    #[serde(default)]
    pub vector_queries: Vec<String>,
    #[serde(default, alias = "page_index")]
    pub page_indices: Vec<usize>,
}

impl SearchPlan {
    pub fn uses(&self, kind: RetrieverKind) -> bool {
        self.tools.contains(&kind)
    }
}

// ============================================================================
// Integration / Reflection
// ============================================================================

/// 통합 단계 응답
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntegratedAnswer {
    pub content: String,
    /// 페이지 ID (문자열 또는 숫자)
    #[serde(default)]
    pub sources: Vec<Value>,
}

impl IntegratedAnswer {
    /// 출처를 문자열로 정리. null은 버림
    pub fn source_ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| match s {
                Value::Null => None,
                Value::String(text) => Some(text.clone()),
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// 완결성 판단 응답
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CompletenessCheck {
    pub enough: bool,
}

/// 후속 질문 응답
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FollowUpRequests {
    #[serde(default)]
    pub new_requests: Vec<String>,
}

impl FollowUpRequests {
    /// 첫 번째 유효한 질문
    pub fn first(&self) -> Option<String> {
        self.new_requests
            .iter()
            .take(MAX_NEW_REQUESTS)
            .map(|r| r.trim())
            .find(|r| !r.is_empty())
            .map(str::to_string)
    }
}

// ============================================================================
// JSON Schemas
// ============================================================================

pub fn planning_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "info_needs": {"type": "array", "items": {"type": "string"}},
            "tools": {
                "type": "array",
                "items": {"type": "string", "enum": ["dense", "keyword", "page_index"]}
            },
            "keyword_collection": {"type": "array", "items": {"type": "string"}},
            "vector_queries": {"type": "array", "items": {"type": "string"}},
            "page_index": {"type": "array", "items": {"type": "integer", "minimum": 0}}
        },
        "required": ["info_needs", "tools", "keyword_collection", "vector_queries", "page_index"]
    })
}

pub fn integrate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": {"type": "string"},
            "sources": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["content", "sources"]
    })
}

pub fn info_check_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"enough": {"type": "boolean"}},
        "required": ["enough"]
    })
}

pub fn follow_up_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "new_requests": {
                "type": "array",
                "items": {"type": "string"},
                "maxItems": MAX_NEW_REQUESTS
            }
        },
        "required": ["new_requests"]
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_prompt_keys_and_aliases() {
        let plan: SearchPlan = serde_json::from_value(json!({
            "info_needs": ["capital"],
            "tools": ["dense", "bm25"],
            "keyword_collection": ["France capital"],
            "vector_queries": ["What is the capital of France?"],
            "page_index": [2, 0]
        }))
        .unwrap();

        assert_eq!(plan.tools, vec![RetrieverKind::Dense, RetrieverKind::Keyword]);
        assert_eq!(plan.keyword_queries, vec!["France capital"]);
        assert_eq!(plan.page_indices, vec![2, 0]);
        assert!(plan.uses(RetrieverKind::Keyword));
        assert!(!plan.uses(RetrieverKind::PageIndex));
    }

    #[test]
    fn test_plan_missing_fields_default() {
        let plan: SearchPlan = serde_json::from_value(json!({})).unwrap();
        assert_eq!(plan, SearchPlan::default());
    }

    #[test]
    fn test_plan_strict_on_bad_values() {
        assert!(serde_json::from_value::<SearchPlan>(json!({"tools": ["graph"]})).is_err());
        assert!(serde_json::from_value::<SearchPlan>(json!({"page_index": [-1]})).is_err());
        assert!(serde_json::from_value::<SearchPlan>(json!({"vector_queries": "x"})).is_err());
    }

    #[test]
    fn test_answer_source_ids() {
        let answer: IntegratedAnswer = serde_json::from_value(json!({
            "content": "Paris",
            "sources": ["0", 3, null, ""]
        }))
        .unwrap();
        assert_eq!(answer.source_ids(), vec!["0", "3"]);

        assert!(serde_json::from_value::<IntegratedAnswer>(json!({"sources": []})).is_err());
    }

    #[test]
    fn test_follow_up_first() {
        let requests = FollowUpRequests {
            new_requests: vec!["  ".into(), "Who founded Paris?".into()],
        };
        assert_eq!(requests.first().as_deref(), Some("Who founded Paris?"));
        assert_eq!(FollowUpRequests::default().first(), None);
    }
}
