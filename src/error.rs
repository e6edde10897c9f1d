//! 에러 타입
//!
//! 라이브러리 전체에서 사용하는 에러 분류입니다.
//!
//! - `Encoding` / `IndexBuild`: 인덱스 build/update 중 발생, 호출자에게 전파
//! - `Planning` / `Integration` / `Reflection`: 리서치 루프 내부에서 폴백으로 복구
//! - `DriftInconsistency`: 저장소가 줄어든 경우, 전체 재빌드 신호

use std::path::PathBuf;

/// 라이브러리 Result 별칭
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 임베딩 백엔드 실패 (재시도 후에도 실패)
    #[error("embedding backend failed: {message}")]
    Encoding { message: String },

    /// 키워드 인덱스 빌드 재시도 소진
    #[error("keyword index build failed after {attempts} attempts: {message}")]
    IndexBuild { attempts: u32, message: String },

    #[error("planning failed: {0}")]
    Planning(String),

    #[error("integration failed: {0}")]
    Integration(String),

    #[error("reflection failed: {0}")]
    Reflection(String),

    /// 인덱스가 알고 있는 페이지 수보다 저장소가 작아짐
    #[error("repository shrank from {indexed} to {current} pages")]
    DriftInconsistency { indexed: usize, current: usize },

    /// 생성(LLM) 백엔드 호출 실패
    #[error("generation backend failed: {0}")]
    Generation(String),

    /// 수집하기에 너무 짧은 문서
    #[error("document too short to ingest ({chars} chars, minimum {min})")]
    EmptyDocument { chars: usize, min: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("index not found at {0:?}")]
    IndexMissing(PathBuf),

    /// 영속화된 인덱스 데이터를 읽을 수 없음
    #[error("persisted index is corrupt: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Vector(#[from] lancedb::Error),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn encoding(err: impl std::fmt::Display) -> Self {
        Self::Encoding {
            message: err.to_string(),
        }
    }

    pub(crate) fn generation(err: impl std::fmt::Display) -> Self {
        Self::Generation(err.to_string())
    }
}
