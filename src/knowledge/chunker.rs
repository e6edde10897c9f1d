//! Text Chunking Module
//!
//! 긴 문서를 고정 크기 윈도우로 나눕니다.
//! 청크 하나가 메모리 페이지 하나가 되므로 생성/임베딩 입력 한도를 넘지 않게 자릅니다.

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 청크 크기 (문자 수)
    pub chunk_characters: usize,
    /// 오버랩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_characters: 2000,
            overlap_characters: 200,
        }
    }
}

impl ChunkConfig {
    /// 윈도우 이동 간격. 오버랩이 청크보다 크면 오버랩 없음
    fn step(&self) -> usize {
        let overlap = if self.chunk_characters <= self.overlap_characters {
            0
        } else {
            self.overlap_characters
        };
        self.chunk_characters.saturating_sub(overlap).max(1)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// WindowChunker
// ============================================================================

/// 겹치는 고정 크기 윈도우
///
/// 문자(char) 단위로 자르므로 멀티바이트 문자 중간에서 끊기지 않습니다.
/// 앞뒤 공백을 제거한 뒤 비어 있는 청크는 버립니다.
pub struct WindowChunker {
    config: ChunkConfig,
}

impl WindowChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl Chunker for WindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let size = self.config.chunk_characters.max(1);
        let step = self.config.step();

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + size).min(chars.len());
            let chunk: String = chars[start..end].iter().collect();
            let chunk = chunk.trim();
            if !chunk.is_empty() {
                chunks.push(chunk.to_string());
            }
            start += step;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "window"
    }
}

/// 기본 청커 (2000자, 200자 오버랩)
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(WindowChunker::with_defaults())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> WindowChunker {
        WindowChunker::new(ChunkConfig {
            chunk_characters: size,
            overlap_characters: overlap,
        })
    }

    #[test]
    fn test_chunker_empty() {
        assert!(default_chunker().chunk("").is_empty());
        assert!(default_chunker().chunk("   \n ").is_empty());
    }

    #[test]
    fn test_chunker_small_text() {
        let chunks = default_chunker().chunk("  short text ");
        assert_eq!(chunks, vec!["short text"]);
    }

    #[test]
    fn test_windows_overlap() {
        let chunks = chunker(4, 2).chunk("abcdefgh");
        // step 2: abcd, cdef, efgh, gh
        assert_eq!(chunks, vec!["abcd", "cdef", "efgh", "gh"]);
    }

    #[test]
    fn test_overlap_not_smaller_than_size() {
        let chunks = chunker(3, 5).chunk("abcdefg");
        assert_eq!(chunks, vec!["abc", "def", "g"]);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let chunks = chunker(2, 0).chunk("한국어텍스트");
        assert_eq!(chunks, vec!["한국", "어텍", "스트"]);
    }

    #[test]
    fn test_default_window_sizes() {
        let text = "x".repeat(4500);
        let chunks = default_chunker().chunk(&text);
        // 시작 위치 0, 1800, 3600
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 2000);
        assert_eq!(chunks[2].len(), 900);
    }
}
