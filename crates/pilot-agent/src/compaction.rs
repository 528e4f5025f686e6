//! Token estimation and history serialization for context compaction

use std::fmt::Write as _;

use pilot_ai::{Message, Role, ToolDef};

/// Heuristic ratio for estimating token count
pub const CHARS_PER_TOKEN: usize = 4;
/// Fraction of the context window kept free; compaction triggers above
/// `window * (1 - CONTEXT_BUFFER)`
pub const CONTEXT_BUFFER: f64 = 0.2;

/// Estimate the token count for one message (chars/4, floored at 1)
pub fn estimate_tokens(msg: &Message) -> u32 {
    let mut chars = role_str(msg.role).len();
    if let Some(content) = &msg.content {
        chars += content.len();
    }
    for call in &msg.tool_calls {
        chars += call.name.len() + call.arguments.len();
    }
    ((chars / CHARS_PER_TOKEN) as u32).max(1)
}

/// Estimate total tokens across all messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

/// Estimate tokens consumed by the tool definitions
pub fn estimate_tool_def_tokens(defs: &[ToolDef]) -> u32 {
    let Ok(data) = serde_json::to_string(defs) else {
        return 0;
    };
    let tokens = (data.len() / CHARS_PER_TOKEN) as u32;
    if tokens == 0 && !defs.is_empty() {
        1
    } else {
        tokens
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// System prompt for the summarization call
pub fn compaction_prompt() -> &'static str {
    r#"Your task is to create a detailed summary of the conversation so far, paying close attention to the user's explicit requests and your previous actions. This summary should be thorough in capturing technical details, code patterns, and architectural decisions essential for continuing work without losing context.

Before providing your final summary, wrap your analysis in <analysis> tags to organize your thoughts. In your analysis:
1. Chronologically analyze each message, identifying: the user's explicit requests and intents, your approach, key decisions and code patterns, specific file names, code snippets, function signatures, and file edits.
2. Note errors encountered and how they were fixed, paying special attention to user feedback.
3. Double-check for technical accuracy and completeness.

Your summary should include these sections:

1. Primary Request and Intent: All of the user's explicit requests and intents in detail.
2. Key Technical Concepts: Important technical concepts, technologies, and frameworks discussed.
3. Files and Code Sections: Specific files examined, modified, or created, with summaries of why each is important and what changes were made. Include code snippets where applicable.
4. Errors and Fixes: All errors encountered and how they were resolved, including any user feedback.
5. Problem Solving: Problems solved and any ongoing troubleshooting.
6. Pending Tasks: Any tasks explicitly asked for that remain incomplete.
7. Current Work: Precisely what was being worked on immediately before this summary, including file names and code snippets.
8. Optional Next Step: The next step related to the most recent work, only if directly in line with the user's most recent explicit request.

Drop verbose tool outputs (full file contents, long search results) — instead note what was learned. Drop redundant back-and-forth and dead-end steps unless the dead end itself is informative.

Output the summary directly. Do not include any preamble or meta-commentary outside the analysis and summary."#
}

/// Format messages into readable text for the summarization call.
/// Tool results over 1000 chars and system content over 500 chars are
/// truncated with a marker.
pub fn serialize_history(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        match msg.role {
            Role::System => {
                out.push_str("[System]\n");
                out.push_str(&truncate_chars(msg.content_str(), 500));
            }
            Role::User => {
                out.push_str("[User]\n");
                out.push_str(msg.content_str());
            }
            Role::Assistant => {
                out.push_str("[Assistant]\n");
                out.push_str(msg.content_str());
                for call in &msg.tool_calls {
                    let _ = write!(out, "\n[Tool Call: {}({})]", call.name, call.arguments);
                }
            }
            Role::Tool => {
                out.push_str("[Tool Result]\n");
                out.push_str(&truncate_chars(msg.content_str(), 1000));
            }
        }
        out.push_str("\n\n");
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...[truncated]", truncated)
    } else {
        truncated
    }
}
