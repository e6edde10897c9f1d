//! 프롬프트 템플릿
//!
//! `{name}` 자리표시자를 [`render`]로 치환합니다.

/// 단계별 사용자 지시문 (비어 있으면 프롬프트 그대로)
#[derive(Debug, Clone, Default)]
pub struct StageInstructions {
    pub planning: Option<String>,
    pub integration: Option<String>,
    pub reflection: Option<String>,
    pub memory: Option<String>,
}

/// 자리표시자 치환
///
/// 템플릿만 한 번 훑으며 `{name}`을 찾습니다. 삽입된 값은 다시 검사하지 않고,
/// `vars`에 없는 중괄호(JSON 예시 등)는 그대로 둡니다.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let value = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(var, _)| *var == name)
                .map(|(_, value)| (*value, close))
        });

        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);

    out
}

/// 사용자 지시문을 앞에 붙임
pub fn with_instructions(instructions: Option<&str>, prompt: String) -> String {
    match instructions.map(str::trim) {
        Some(text) if !text.is_empty() => {
            format!("User Instructions: {}\n\nSystem Prompt: {}", text, prompt)
        }
        _ => prompt,
    }
}

pub const MEMORY_PROMPT: &str = r#"You are a memory abstraction assistant. Summarize the NEW CONTENT into one short abstract that can later be used to decide whether this content is relevant to a question.

EXISTING MEMORY (abstracts of previously stored pages):
{memory_context}

NEW CONTENT:
{input_message}

RULES:
- Write one or two sentences naming the concrete entities, facts and topics in NEW CONTENT.
- Do not repeat information that only appears in EXISTING MEMORY.
- Do not add facts that are not in NEW CONTENT.

Return ONLY the abstract text, without a label or quotes."#;

pub const PLANNING_PROMPT: &str = r#"You are a search planning assistant. Build a retrieval plan that finds the information needed to answer the QUESTION.

QUESTION:
{request}

MEMORY (abstracts of stored pages, "Page N" is the page index):
{memory}

AVAILABLE TOOLS:
1. "dense": semantic search. Use natural language questions or descriptions.
2. "keyword": lexical BM25 search. Use specific terms, names and exact phrases.
3. "page_index": direct lookup of pages by index when MEMORY clearly points at them.

INSTRUCTIONS:
- Decide which information is needed to answer the QUESTION.
- Pick one or more tools. Use both "dense" and "keyword" when unsure.
- Write 2-4 focused queries in total and do not repeat a query.

OUTPUT FORMAT:
Return ONE JSON object with these keys:
- "info_needs": list of strings
- "tools": list containing "dense", "keyword" and/or "page_index"
- "keyword_collection": list of keyword queries (may be empty)
- "vector_queries": list of semantic queries (may be empty)
- "page_index": list of integer page indices (may be empty)

Example:
{"info_needs": ["Capital city of France"], "tools": ["dense", "keyword"], "keyword_collection": ["France capital"], "vector_queries": ["What is the capital of France?"], "page_index": []}

Return ONLY the JSON object."#;

pub const INTEGRATE_PROMPT: &str = r#"You are an expert assistant. Answer the QUESTION using the EVIDENCE and the PREVIOUS INFORMATION.

QUESTION:
{question}

EVIDENCE:
{evidence_context}

PREVIOUS INFORMATION:
{result}

INSTRUCTIONS:
- Start with a direct answer, then add the supporting details found in the evidence.
- Merge useful facts from PREVIOUS INFORMATION with the new evidence.
- Present the information naturally without phrases like "according to the evidence".
- If the evidence is not sufficient, say so clearly.
- Never invent facts.

OUTPUT FORMAT:
Return ONE JSON object with EXACTLY these keys:
- "content": string, the complete answer
- "sources": array of page ids that support the answer

Return ONLY the JSON object."#;

pub const INFO_CHECK_PROMPT: &str = r#"You judge whether the collected information is sufficient to answer a QUESTION. You do NOT answer the QUESTION.

REQUEST:
{request}

RESULT:
{result}

PROCEDURE:
1. List the pieces of information the REQUEST needs.
2. Check whether RESULT states each piece clearly and specifically.
3. "enough" is true ONLY IF every piece is covered well enough to write a final answer without more retrieval.

You may reason inside <think>...</think> first. After it, output ONLY a JSON object with EXACTLY one key:
- "enough": boolean"#;

pub const FOLLOW_UP_PROMPT: &str = r#"You propose follow-up retrieval questions for information that is still missing.

REQUEST:
{request}

RESULT:
{result}

INSTRUCTIONS:
1. Determine what the REQUEST needs and which parts RESULT does not cover yet.
2. For each missing part write ONE standalone question that retrieval could answer. Mention concrete entities when they are known.
3. Order the questions from most to least critical and produce at most 5.

You may reason inside <think>...</think> first. After it, output ONLY a JSON object with EXACTLY one key:
- "new_requests": array of strings (0 to 5 items)"#;
