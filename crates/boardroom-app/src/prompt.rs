// Prompt templates for conversation titles and the report pipeline.
//
// Each builder returns the message list for one completion call. The chat
// backend prepends the persona's own system prompt in front of these.

use boardroom_core::persona::analysis_system_prompt;
use boardroom_llm::ChatMessage;

/// Longest title kept from a title completion.
pub const TITLE_MAX_CHARS: usize = 50;

// ---------------------------------------------------------------------------
// Titles
// ---------------------------------------------------------------------------

pub fn conversation_title(first_message: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Generate a short, concise title (max {TITLE_MAX_CHARS} characters) for this conversation: \
         \"{first_message}\". Respond with ONLY the title, no quotes or extra text."
    ))]
}

pub fn report_title(topic: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(format!(
        "Generate a concise, professional report title (max {TITLE_MAX_CHARS} characters) for: \"{topic}\"\n\
         \n\
         Respond with ONLY the title, no quotes or extra text."
    ))]
}

// ---------------------------------------------------------------------------
// Report pipeline
// ---------------------------------------------------------------------------

/// (a) Executive summary with an overall Go/No-Go/Conditional call.
pub fn executive_summary(topic: &str, agents: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are an expert executive report writer. Create concise, impactful executive \
             summaries for C-level executives.",
        ),
        ChatMessage::user(format!(
            "Create an executive summary for a report about: \"{topic}\"\n\
             \n\
             The report involves insights from these C-level executives: {agents}\n\
             \n\
             Provide a 2-3 paragraph executive summary that:\n\
             - Clearly states the main findings\n\
             - Highlights key opportunities or concerns\n\
             - Provides an overall recommendation (Go/No-Go/Conditional)\n\
             \n\
             Format: Professional business writing, suitable for CEO review.",
            agents = agents.join(", ")
        )),
    ]
}

/// (b) KPI list, requested as a bare JSON array.
pub fn kpis(topic: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system("You are a business analyst. Generate relevant KPIs for reports."),
        ChatMessage::user(format!(
            "Generate 4-5 key performance indicators (KPIs) for a report about: \"{topic}\"\n\
             \n\
             For each KPI, provide:\n\
             - Metric name (in Korean)\n\
             - Current value (with percentage if applicable)\n\
             - Status: positive, neutral, or negative\n\
             \n\
             Format as JSON array:\n\
             [\n  {{\"metric\": \"매출 성장률\", \"value\": \"+15%\", \"status\": \"positive\"}},\n  ...\n]\n\
             \n\
             Respond with ONLY the JSON array, no additional text."
        )),
    ]
}

/// (c) One persona's analysis of the topic.
pub fn agent_analysis(topic: &str, agent: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(analysis_system_prompt(agent)),
        ChatMessage::user(format!(
            "Provide a detailed analysis for the topic: \"{topic}\"\n\
             \n\
             Include:\n\
             1. Current situation assessment (2-3 sentences)\n\
             2. Key findings and data points\n\
             3. 3-5 specific, actionable recommendations\n\
             4. Risk factors or concerns\n\
             \n\
             Format as structured text with clear sections."
        )),
    ]
}

/// (d) Implementation plan, requested as a bare JSON array.
pub fn next_steps(topic: &str, agents: &[String]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are a strategic planning expert. Create actionable implementation plans.",
        ),
        ChatMessage::user(format!(
            "Based on the topic: \"{topic}\" and the analyses from {agents}\n\
             \n\
             Generate 3-4 concrete next steps with:\n\
             - Clear step number\n\
             - Actionable title\n\
             - Specific description (what to do, timeline, responsible party)\n\
             \n\
             Format as JSON array:\n\
             [\n  {{\"title\": \"시장 테스트 (3개월)\", \"description\": \"타겟 고객 100명 대상 베타 테스트 진행 및 피드백 수집\"}},\n  ...\n]\n\
             \n\
             Respond with ONLY the JSON array, no additional text.",
            agents = agents.join(", ")
        )),
    ]
}

// ---------------------------------------------------------------------------
// Title cleanup
// ---------------------------------------------------------------------------

/// First `max` characters of `text`.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Cap a model-produced title and strip any quotes it added.
pub fn clean_title(raw: &str) -> String {
    truncate_chars(raw.trim(), TITLE_MAX_CHARS)
        .chars()
        .filter(|c| *c != '"' && *c != '\'')
        .collect::<String>()
        .trim()
        .to_string()
}
