//! OpenAI 호환 Chat Completions 클라이언트
//!
//! `POST {base_url}/chat/completions`, Bearer 인증.
//! 구조화 호출은 `response_format = json_schema`를 보냅니다.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::{extract_json, strip_think, Generation, Generator};

/// Groq OpenAI 호환 엔드포인트
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";

/// 429/네트워크 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// OpenAiGenerator
// ============================================================================

#[derive(Debug)]
pub struct OpenAiGenerator {
    config: OpenAiConfig,
    endpoint: url::Url,
    client: reqwest::Client,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("LLM API key is empty".into()));
        }

        let raw = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));
        let endpoint = url::Url::parse(&raw).map_err(|e| {
            Error::Config(format!("invalid LLM base url {}: {}", config.base_url, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str, schema: Option<&'a Value>) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: schema.map(|schema| ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "response",
                    schema,
                },
            }),
        }
    }

    async fn complete(&self, request: &ChatRequest<'_>) -> Result<String> {
        let mut last_error: Option<Error> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Chat completion failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint.clone())
                .bearer_auth(&self.config.api_key)
                .json(request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Error::generation(format!("request failed: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                return parse_content(&body);
            }

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(Error::generation(format!("LLM API returned {}", status)));
                continue;
            }

            return Err(Error::generation(format!(
                "LLM API error ({}): {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }

        Err(last_error.unwrap_or_else(|| {
            Error::generation(format!("chat completion failed after {} retries", MAX_RETRIES))
        }))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate_single(&self, prompt: &str, schema: Option<&Value>) -> Result<Generation> {
        let request = self.request(prompt, schema);
        let text = self.complete(&request).await?;

        let json = match schema {
            Some(_) => match extract_json(&text) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::debug!("Structured response is not JSON: {}", e);
                    None
                }
            },
            None => None,
        };

        let text = if schema.is_some() { text } else { strip_think(&text) };
        Ok(Generation { text, json })
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// `choices[0].message.content`
fn parse_content(body: &str) -> Result<String> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| Error::generation(format!("malformed chat response: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::generation("chat response has no content"))
}

// ============================================================================
// Tests
// ============================================================================
