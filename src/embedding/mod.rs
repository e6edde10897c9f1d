//! 임베딩 모듈 - 텍스트 벡터화
//!
//! Dense 인덱스가 사용하는 임베딩 백엔드 인터페이스입니다.
//!
//! - [`HttpEmbedder`]: 외부 인코딩 서비스 (`POST {api_url}/encode`)
//! - [`HashingEmbedder`]: 로컬 결정적 해싱 임베딩 (오프라인/테스트용)
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HttpEmbedder::new(HttpEmbedderConfig::new("http://localhost:8001", 1024))?;
//! let vectors = embedder.encode_corpus(&["Hello, world!".to_string()]).await?;
//! ```

mod hashing;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use hashing::{HashingEmbedder, DEFAULT_HASHING_DIMENSION};

// ============================================================================
// Embedder Trait
// ============================================================================

/// 임베딩 백엔드 트레이트
///
/// 문서(corpus)와 질의(query)를 별도로 인코딩할 수 있습니다.
/// 출력 벡터 수는 항상 입력 텍스트 수와 같아야 합니다.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// 문서 텍스트 인코딩
    async fn encode_corpus(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// 질의 텍스트 인코딩 (기본 구현: 문서와 동일)
    async fn encode_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_corpus(texts).await
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

// ============================================================================
// HTTP Encoding Service
// ============================================================================

/// 429/네트워크 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 1000;

/// 인코딩 서비스 설정
#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    /// 서비스 주소 (예: `http://localhost:8001`)
    pub api_url: String,
    /// 임베딩 차원
    pub dimension: usize,
    pub batch_size: usize,
    pub max_length: usize,
    pub timeout: Duration,
}

impl HttpEmbedderConfig {
    pub fn new(api_url: impl Into<String>, dimension: usize) -> Self {
        Self {
            api_url: api_url.into(),
            dimension,
            batch_size: 32,
            max_length: 512,
            // 대량 인코딩은 오래 걸릴 수 있음
            timeout: Duration::from_secs(300),
        }
    }
}

/// 외부 인코딩 서비스 클라이언트
#[derive(Debug)]
pub struct HttpEmbedder {
    config: HttpEmbedderConfig,
    endpoint: url::Url,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EncodeRequest<'a> {
    texts: &'a [String],
    #[serde(rename = "type")]
    encode_type: &'static str,
    batch_size: usize,
    max_length: usize,
}

#[derive(Debug, Deserialize)]
struct EncodeResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }

        let raw = format!("{}/encode", config.api_url.trim_end_matches('/'));
        let endpoint = url::Url::parse(&raw).map_err(|e| {
            Error::Config(format!("invalid embedding api url {}: {}", config.api_url, e))
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

    async fn encode(&self, texts: &[String], encode_type: &'static str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let request = EncodeRequest {
            texts,
            encode_type,
            batch_size: self.config.batch_size,
            max_length: self.config.max_length,
        };

        let mut last_error: Option<Error> = None;

        // 재시도 루프 (429 / 5xx / 전송 에러 시 지수 백오프)
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt - 1));
                tracing::warn!(
                    "Encoding request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    MAX_RETRIES
                );
                tokio::time::sleep(backoff).await;
            }

            let response = match self
                .client
                .post(self.endpoint.clone())
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(Error::encoding(format!("request to {} failed: {}", self.endpoint, e)));
                    continue;
                }
            };

            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                let parsed: EncodeResponse = serde_json::from_str(&body)
                    .map_err(|e| Error::encoding(format!("malformed encode response: {}", e)))?;
                return self.check_shape(texts.len(), parsed.embeddings);
            }

            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(Error::encoding(format!("encoding service returned {}", status)));
                continue;
            }

            // 4xx - 즉시 실패
            return Err(Error::encoding(format!(
                "encoding service error ({}): {}",
                status,
                truncate(&body, 500)
            )));
        }

        Err(last_error.unwrap_or_else(|| {
            Error::encoding(format!("encoding failed after {} retries", MAX_RETRIES))
        }))
    }

    fn check_shape(&self, expected: usize, embeddings: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if embeddings.len() != expected {
            return Err(Error::encoding(format!(
                "expected {} embeddings, got {}",
                expected,
                embeddings.len()
            )));
        }

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.config.dimension) {
            return Err(Error::encoding(format!(
                "expected dimension {}, got {}",
                self.config.dimension,
                bad.len()
            )));
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn encode_corpus(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode(texts, "corpus").await
    }

    async fn encode_queries(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode(texts, "query").await
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn name(&self) -> &str {
        "http-encode"
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
