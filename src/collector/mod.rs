//! 텍스트 파일 수집 모듈
//!
//! 로컬 파일/폴더에서 텍스트를 읽어 메모리 입력으로 넘깁니다.
//! .gitignore 패턴을 존중하고, 텍스트 확장자만 수집합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

/// 수집하는 텍스트 확장자
const TEXT_EXTENSIONS: &[&str] = &[
    "md", "markdown", "txt", "rst", "org", "adoc", "rs", "ts", "tsx", "js", "jsx", "py", "json",
    "toml", "yaml", "yml", "html", "css", "go", "java", "c", "cpp", "h", "hpp", "sh", "sql", "xml",
    "csv",
];

pub fn is_text_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| TEXT_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

// ============================================================================
// Collected File
// ============================================================================

/// 읽어 들인 텍스트 파일
#[derive(Debug, Clone)]
pub struct TextFile {
    pub path: PathBuf,
    pub content: String,
}

impl TextFile {
    /// 파일 읽기. 지원하지 않는 확장자나 UTF-8이 아닌 파일은 `None`
    pub fn read(path: &Path, max_file_size: u64) -> Result<Option<Self>> {
        if !is_text_path(path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;
        if !metadata.is_file() {
            return Ok(None);
        }
        if max_file_size > 0 && metadata.len() > max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", path, metadata.len());
            return Ok(None);
        }

        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        match String::from_utf8(bytes) {
            Ok(content) => Ok(Some(Self {
                path: path.to_path_buf(),
                content,
            })),
            Err(_) => {
                tracing::warn!("Skipping non UTF-8 file: {:?}", path);
                Ok(None)
            }
        }
    }

    pub fn size(&self) -> usize {
        self.content.len()
    }
}

// ============================================================================
// File Collector
// ============================================================================

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub respect_gitignore: bool,
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<Option<TextFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.is_file() {
            anyhow::bail!("File not found: {:?}", abs_path);
        }

        TextFile::read(&abs_path, self.config.max_file_size)
    }

    /// 폴더 재귀 수집 (경로 순 정렬)
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<TextFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.is_dir() {
            anyhow::bail!("Directory not found: {:?}", abs_path);
        }

        // git 저장소 밖에서도 .gitignore 적용
        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .require_git(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match TextFile::read(entry.path(), self.config.max_file_size) {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        tracing::info!("Collected {} text files from {:?}", files.len(), abs_path);
        Ok(files)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_text_extensions() {
        assert!(is_text_path(Path::new("notes.md")));
        assert!(is_text_path(Path::new("README.TXT")));
        assert!(!is_text_path(Path::new("photo.png")));
        assert!(!is_text_path(Path::new("Makefile")));
    }

    #[test]
    fn test_collect_directory_respects_gitignore() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".gitignore"), "ignored/\n").unwrap();
        fs::create_dir_all(root.join("ignored")).unwrap();
        fs::create_dir_all(root.join("docs")).unwrap();
        fs::write(root.join("ignored/secret.md"), "hidden").unwrap();
        fs::write(root.join("docs/b.md"), "second").unwrap();
        fs::write(root.join("a.txt"), "first").unwrap();
        fs::write(root.join("image.png"), [0u8, 159, 146, 150]).unwrap();

        let files = FileCollector::with_defaults().collect_directory(root).unwrap();
        let contents: Vec<&str> = files.iter().map(|f| f.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn test_non_utf8_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.txt");
        fs::write(&path, [0xffu8, 0xfe, 0x00]).unwrap();

        assert!(FileCollector::with_defaults().collect_file(&path).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let result = FileCollector::with_defaults().collect_file(&temp_dir.path().join("nope.md"));
        assert!(result.is_err());
    }

    #[test]
    fn test_max_file_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.md");
        fs::write(&path, "x".repeat(100)).unwrap();

        let collector = FileCollector::new(CollectorConfig {
            max_file_size: 10,
            ..Default::default()
        });
        assert!(collector.collect_file(&path).unwrap().is_none());
    }
}
