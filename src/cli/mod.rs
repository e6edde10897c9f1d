//! CLI 모듈
//!
//! gam-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::collector::{FileCollector, TextFile};
use crate::config::EngineConfig;
use crate::engine::MemoryEngine;
use crate::knowledge::ChunkConfig;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "gam-rag")]
#[command(version, about = "하이브리드 검색 기반 에이전트 메모리", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트, 파일, 또는 폴더를 메모리에 저장
    Memorize {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 저장할 파일 경로
        #[arg(long)]
        file: Option<PathBuf>,

        /// 저장할 폴더 경로 (재귀, .gitignore 적용)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 짧은 입력을 한 번의 배치 호출로 처리
        #[arg(short, long)]
        batch: bool,
    },

    /// 리서치 루프로 질문에 답하기
    Research {
        query: String,

        /// 최대 반복 횟수 (기본: GAM_MAX_RESEARCH_ITERS)
        #[arg(short, long)]
        max_iters: Option<usize>,

        /// 반복별 기록을 JSON으로 출력
        #[arg(long)]
        trace: bool,
    },

    /// 하이브리드 검색 (답변 생성 없음)
    Search {
        query: String,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// 저장된 페이지 목록
    Pages {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 추상 메모리 출력
    Memory,

    /// 모든 인덱스 재빌드
    Reindex,

    /// 페이지, 메모리, 인덱스 전체 삭제
    Clear {
        /// 확인 없이 삭제
        #[arg(long)]
        yes: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = EngineConfig::from_env().context("설정 읽기 실패")?;

    match cli.command {
        Commands::Memorize {
            text,
            file,
            dir,
            batch,
        } => cmd_memorize(&config, text, file, dir, batch).await,
        Commands::Research {
            query,
            max_iters,
            trace,
        } => cmd_research(&config, &query, max_iters, trace).await,
        Commands::Search { query, limit } => cmd_search(&config, &query, limit).await,
        Commands::Pages { limit } => cmd_pages(&config, limit).await,
        Commands::Memory => cmd_memory(&config).await,
        Commands::Reindex => cmd_reindex(&config).await,
        Commands::Clear { yes } => cmd_clear(&config, yes).await,
        Commands::Status => cmd_status(&config).await,
    }
}

async fn open_engine(config: &EngineConfig) -> Result<MemoryEngine> {
    MemoryEngine::open(config)
        .await
        .context("MemoryEngine 초기화 실패")
}

fn require_llm_key(config: &EngineConfig) -> Result<()> {
    if !config.has_llm_key() {
        bail!(
            "LLM API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GAM_LLM_API_KEY=your-api-key\n  \
             또는\n  \
             export GROQ_API_KEY=your-api-key"
        );
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 메모리 저장 명령어 (memorize)
///
/// 청크 크기보다 긴 입력은 문서로 수집(청킹 → 배치)하고,
/// 짧은 입력은 하나씩 또는 `--batch`로 한 번에 저장합니다.
async fn cmd_memorize(
    config: &EngineConfig,
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    batch: bool,
) -> Result<()> {
    require_llm_key(config)?;

    let collector = FileCollector::with_defaults();
    let inputs: Vec<(String, String)> = if let Some(text) = text {
        vec![("direct-input".to_string(), text)]
    } else if let Some(ref file_path) = file {
        match collector.collect_file(file_path)? {
            Some(f) => vec![labelled(f)],
            None => {
                println!("[!] 지원하지 않는 파일 형식: {:?}", file_path);
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector
            .collect_directory(dir_path)?
            .into_iter()
            .map(labelled)
            .collect()
    } else {
        bail!("--text, --file, --dir 중 하나를 지정해야 합니다");
    };

    if inputs.is_empty() {
        println!("[!] 저장할 입력이 없습니다.");
        return Ok(());
    }

    let engine = open_engine(config).await?;
    let chunk_size = ChunkConfig::default().chunk_characters;

    let (documents, short): (Vec<_>, Vec<_>) = inputs
        .into_iter()
        .partition(|(_, content)| content.chars().count() > chunk_size);

    let mut stored = 0;
    let mut failed = 0;

    for (i, (label, content)) in documents.iter().enumerate() {
        print!("[{}/{}] [DOC] {}... ", i + 1, documents.len(), label);
        match engine.ingest_document(content).await {
            Ok(updates) => {
                println!("{} 페이지", updates.len());
                stored += updates.len();
            }
            Err(e) => {
                println!("실패: {}", e);
                failed += 1;
            }
        }
    }

    if batch && !short.is_empty() {
        println!("[*] 배치 저장 중: {} 건", short.len());
        let texts: Vec<String> = short.into_iter().map(|(_, content)| content).collect();
        let updates = engine.memorize_batch(&texts).await.context("배치 저장 실패")?;
        stored += updates.len();
    } else {
        for (label, content) in short {
            match engine.memorize(&content).await {
                Ok(Some(update)) => {
                    println!("[OK] #{} {}", update.page_index, label);
                    println!("     추상: {}", truncate_text(&update.page.header, 100));
                    stored += 1;
                }
                Ok(None) => println!("[!] 빈 입력 건너뜀: {}", label),
                Err(e) => {
                    println!("[!] 저장 실패 ({}): {}", label, e);
                    failed += 1;
                }
            }
        }
    }

    engine.refresh_indexes().await.context("인덱스 갱신 실패")?;

    println!();
    println!("[OK] 완료: 저장 {} 페이지, 실패 {}", stored, failed);
    Ok(())
}

fn labelled(file: TextFile) -> (String, String) {
    (file.path.display().to_string(), file.content)
}

/// 리서치 명령어 (research)
async fn cmd_research(
    config: &EngineConfig,
    query: &str,
    max_iters: Option<usize>,
    trace: bool,
) -> Result<()> {
    require_llm_key(config)?;

    let engine = open_engine(config).await?;
    println!("[*] 리서치 중: \"{}\"", query);

    let output = match max_iters {
        Some(iters) => engine.research_with(query, iters).await,
        None => engine.research(query).await,
    }
    .context("리서치 실패")?;

    if trace {
        println!("{}", serde_json::to_string_pretty(&output.iterations)?);
    }

    println!();
    if output.result.content.is_empty() {
        println!("[!] 답변을 만들 정보가 없습니다.");
    } else {
        println!("{}", output.result.content);
    }

    println!();
    println!(
        "[OK] 세션 {} | 반복 {} 회 | 출처: {}",
        output.session_id,
        output.iterations.len(),
        if output.result.sources.is_empty() {
            "-".to_string()
        } else {
            output.result.sources.join(", ")
        }
    );

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(config: &EngineConfig, query: &str, limit: usize) -> Result<()> {
    let engine = open_engine(config).await?;
    println!("[*] 검색 중: \"{}\"", query);

    let hits = engine.search(query, limit).await.context("검색 실패")?;

    if hits.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [점수: {:.4}] Page #{}",
            i + 1,
            hit.meta.score,
            hit.page_id
        );
        println!("   내용: {}", truncate_text(&hit.snippet, 200));
        println!();
    }

    Ok(())
}

/// 페이지 목록 명령어 (pages)
async fn cmd_pages(config: &EngineConfig, limit: usize) -> Result<()> {
    let engine = open_engine(config).await?;
    let store = engine
        .knowledge_store()
        .context("페이지 저장소를 찾을 수 없습니다")?;

    let pages = store.list_pages(limit).context("페이지 목록 조회 실패")?;

    if pages.is_empty() {
        println!("[!] 저장된 페이지가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 페이지 ({} 건):\n", pages.len());
    for stored in pages {
        println!("  #{:<4} {}", stored.index, truncate_text(&stored.page.header, 60));
        println!(
            "        {} | {} chars",
            stored.created_at.format("%Y-%m-%d %H:%M"),
            stored.page.content.chars().count()
        );
        println!();
    }

    Ok(())
}

/// 메모리 출력 명령어 (memory)
async fn cmd_memory(config: &EngineConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    let state = engine.memory_state().context("메모리 조회 실패")?;

    println!("[OK] 추상 {} 건\n", state.abstracts.len());
    println!("{}", state.to_context());
    Ok(())
}

/// 재인덱싱 명령어 (reindex)
async fn cmd_reindex(config: &EngineConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    println!("[*] 인덱스 재빌드 중...");

    engine.rebuild_indexes().await.context("인덱스 재빌드 실패")?;

    let stats = engine.stats().await?;
    println!(
        "[OK] Dense {} 페이지, 키워드 {} 페이지",
        stats.dense_indexed, stats.keyword_indexed
    );
    Ok(())
}

/// 삭제 명령어 (clear)
async fn cmd_clear(config: &EngineConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("모든 페이지, 메모리, 인덱스가 삭제됩니다. 계속하려면 --yes를 지정하세요");
    }

    let engine = open_engine(config).await?;
    engine.clear_all().await.context("초기화 실패")?;

    println!("[OK] 모든 데이터가 삭제되었습니다");
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &EngineConfig) -> Result<()> {
    println!("gam-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    if config.has_llm_key() {
        println!("[OK] LLM: {} ({})", config.model_name, config.llm_base_url);
    } else {
        println!("[!] LLM API 키: 미설정");
        println!("    설정: export GAM_LLM_API_KEY=your-key");
    }

    match &config.embedding_api_url {
        Some(url) => println!("[OK] 임베딩: {} ({}차원)", url, config.embedding_dimension),
        None => println!(
            "[*] 임베딩: 로컬 해싱 ({}차원)",
            config.embedding_dimension
        ),
    }
    println!(
        "[*] 리서치: 최대 {} 회, 반성 정책 {}",
        config.max_research_iters, config.reflection
    );

    let engine = match MemoryEngine::open(config).await {
        Ok(engine) => engine,
        Err(e) => {
            println!("[!] MemoryEngine 열기 실패: {}", e);
            return Ok(());
        }
    };

    match engine.stats().await {
        Ok(stats) => {
            println!("[OK] 페이지: {} 건, 추상: {} 건", stats.page_count, stats.abstract_count);
            if let Some(store) = stats.store {
                println!(
                    "     총 콘텐츠: {}",
                    format_bytes(store.total_content_bytes)
                );
            }
            println!(
                "[OK] 인덱스: Dense {} 페이지 (저장 {} 행), 키워드 {} 페이지",
                stats.dense_indexed, stats.dense_persisted, stats.keyword_indexed
            );
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
