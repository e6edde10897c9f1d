//! 엔진 설정
//!
//! 환경변수에서 읽습니다. 모든 항목에 기본값이 있고,
//! LLM API 키만 없으면 생성 기능을 쓰는 시점에 에러가 납니다.
//!
//! | 변수 | 기본값 |
//! |------|--------|
//! | `GAM_DATA_DIR` | `{data_local_dir}/.gam-rag` |
//! | `GAM_LLM_API_KEY` (`GROQ_API_KEY`, `OPENAI_API_KEY`) | - |
//! | `GAM_LLM_BASE_URL` | Groq OpenAI 호환 URL |
//! | `GAM_MODEL_NAME` | `llama-3.1-8b-instant` |
//! | `GAM_EMBEDDING_API_URL` | 없음 (로컬 해싱 임베더) |
//! | `GAM_EMBEDDING_DIMENSION` | 384 |
//! | `GAM_MAX_RESEARCH_ITERS` | 1 |
//! | `GAM_REFLECTION_POLICY` | `judge` |

use std::path::PathBuf;

use crate::agent::{ReflectionPolicy, ResearchConfig, StageInstructions};
use crate::embedding::DEFAULT_HASHING_DIMENSION;
use crate::error::{Error, Result};
use crate::generation::{OpenAiConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};

const API_KEY_VARS: &[&str] = &["GAM_LLM_API_KEY", "GROQ_API_KEY", "OPENAI_API_KEY"];

/// 기본 데이터 디렉토리
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gam-rag")
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub model_name: String,
    /// 없으면 [`HashingEmbedder`](crate::embedding::HashingEmbedder) 사용
    pub embedding_api_url: Option<String>,
    pub embedding_dimension: usize,
    pub max_research_iters: usize,
    pub reflection: ReflectionPolicy,
    pub instructions: StageInstructions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: get_data_dir(),
            llm_api_key: None,
            llm_base_url: DEFAULT_BASE_URL.to_string(),
            model_name: DEFAULT_MODEL.to_string(),
            embedding_api_url: None,
            embedding_dimension: DEFAULT_HASHING_DIMENSION,
            max_research_iters: 1,
            reflection: ReflectionPolicy::default(),
            instructions: StageInstructions::default(),
        }
    }
}

impl EngineConfig {
    /// 프로세스 환경변수에서 읽기
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 임의의 조회 함수로 읽기. 빈 값은 없는 것으로 취급
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(dir) = get("GAM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.llm_api_key = API_KEY_VARS.iter().find_map(|name| {
            let key = get(name)?;
            tracing::debug!("Using LLM API key from {}", name);
            Some(key)
        });

        if let Some(base_url) = get("GAM_LLM_BASE_URL") {
            url::Url::parse(&base_url).map_err(|e| {
                Error::Config(format!("GAM_LLM_BASE_URL is not a valid URL ({}): {}", base_url, e))
            })?;
            config.llm_base_url = base_url;
        }

        if let Some(model) = get("GAM_MODEL_NAME") {
            config.model_name = model;
        }

        if let Some(api_url) = get("GAM_EMBEDDING_API_URL") {
            url::Url::parse(&api_url).map_err(|e| {
                Error::Config(format!("GAM_EMBEDDING_API_URL is not a valid URL ({}): {}", api_url, e))
            })?;
            config.embedding_api_url = Some(api_url);
        }

        if let Some(dimension) = get("GAM_EMBEDDING_DIMENSION") {
            config.embedding_dimension = parse_positive("GAM_EMBEDDING_DIMENSION", &dimension)?;
        }

        if let Some(iters) = get("GAM_MAX_RESEARCH_ITERS") {
            config.max_research_iters = parse_positive("GAM_MAX_RESEARCH_ITERS", &iters)?;
        }

        if let Some(policy) = get("GAM_REFLECTION_POLICY") {
            config.reflection = policy.parse()?;
        }

        Ok(config)
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    // ========================================================================
    // Paths
    // ========================================================================

    pub fn knowledge_db_path(&self) -> PathBuf {
        self.data_dir.join("knowledge.db")
    }

    pub fn dense_index_dir(&self) -> PathBuf {
        self.data_dir.join("index").join("dense")
    }

    pub fn keyword_index_dir(&self) -> PathBuf {
        self.data_dir.join("index").join("keyword")
    }

    // ========================================================================
    // Derived configs
    // ========================================================================

    pub fn has_llm_key(&self) -> bool {
        self.llm_api_key.is_some()
    }

    /// 생성 백엔드 설정. API 키가 없으면 `Config` 에러
    pub fn openai_config(&self) -> Result<OpenAiConfig> {
        let api_key = self.llm_api_key.clone().ok_or_else(|| {
            Error::Config(format!(
                "LLM API key not found. Set one of: {}",
                API_KEY_VARS.join(", ")
            ))
        })?;

        Ok(OpenAiConfig::new(api_key)
            .with_base_url(&self.llm_base_url)
            .with_model(&self.model_name))
    }

    pub fn research_config(&self) -> ResearchConfig {
        ResearchConfig {
            max_iters: self.max_research_iters,
            reflection: self.reflection,
            instructions: self.instructions.clone(),
        }
    }
}

fn parse_positive(name: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got {:?}",
            name, value
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
