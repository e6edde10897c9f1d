//! 에이전트 모듈
//!
//! - [`MemoryBuilder`]: 입력 → 추상 + 페이지
//! - [`ResearchLoop`]: PLAN → SEARCH → INTEGRATE → REFLECT

mod memory;
mod plan;
mod prompts;
mod research;

pub use memory::{MemoryBuilder, MemoryUpdate, FALLBACK_ABSTRACT_CHARS};
pub use plan::{
    follow_up_schema, info_check_schema, integrate_schema, planning_schema, CompletenessCheck,
    FollowUpRequests, IntegratedAnswer, SearchPlan, MAX_NEW_REQUESTS,
};
pub use prompts::{
    render, with_instructions, StageInstructions, FOLLOW_UP_PROMPT, INFO_CHECK_PROMPT,
    INTEGRATE_PROMPT, MEMORY_PROMPT, PLANNING_PROMPT,
};
pub use research::{
    IterationTrace, ReflectionDecision, ReflectionPolicy, ResearchConfig, ResearchLoop,
    ResearchOutput, ResearchResult, RetrievalMetadata, FALLBACK_TOP_K, FUSED_TOP_N, SEARCH_TOP_K,
};
