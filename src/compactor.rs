//! Context Compactor: summarizes the oldest portion of a thread's history
//! once token usage crosses a threshold (§4.7).
//!
//! Evolves the teacher SDK's `context.rs` character-based token estimate
//! (kept here as the pre-call threshold check) with an LLM-driven
//! summarization step, shaped after a production agent loop's
//! compaction telemetry (tokens-before/after, messages-compacted).

use crate::model::{Model, ModelOptions, ToolChoice};
use crate::thread::Thread;
use crate::types::{CompactionRecord, Message};

/// Decides which messages survive a compaction verbatim. Defaults to
/// keeping only the most recently appended message (K=0: "the summary
/// replaces everything before the current user input") — see DESIGN.md's
/// open-question resolution. Implement this trait to keep, say, the last N
/// turns intact.
pub trait CompactionPolicy: Send + Sync {
    fn keep_from_index(&self, messages: &[Message]) -> usize;
}

/// The default policy: summarize everything except the current turn's
/// just-appended user input.
pub struct SummarizeAll;

impl CompactionPolicy for SummarizeAll {
    fn keep_from_index(&self, messages: &[Message]) -> usize {
        messages.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct CompactionConfig {
    /// Total-usage threshold (§4.7) above which a compaction is attempted
    /// before the next model call.
    pub token_threshold: u64,
    pub summarization_prompt: String,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_threshold: 100_000,
            summarization_prompt: "Summarize the conversation so far for continuity. \
                 Wrap the summary in <summary></summary> tags."
                .to_string(),
        }
    }
}

/// Character-based estimate, same heuristic as the teacher SDK's
/// `estimate_tokens` (1 token ≈ 4 characters), used only to decide whether
/// compaction is worth attempting before paying for a real model call.
pub fn estimate_tokens(messages: &[Message]) -> u64 {
    let mut total_chars: u64 = 0;
    for message in messages {
        total_chars += 8;
        for block in &message.content {
            match block {
                crate::types::ContentBlock::Text(t) => total_chars += t.text.len() as u64,
                crate::types::ContentBlock::Thinking(t) => total_chars += t.thinking.len() as u64,
                crate::types::ContentBlock::ToolUse(t) => {
                    total_chars += t.name.len() as u64 + t.input.to_string().len() as u64;
                }
                crate::types::ContentBlock::ToolResult(r) => {
                    total_chars += r.content.len() as u64 * 8;
                }
                crate::types::ContentBlock::Image(_) | crate::types::ContentBlock::Document(_) => {
                    total_chars += 64;
                }
            }
        }
    }
    (total_chars + 3) / 4
}

/// Extracts the `<summary>...</summary>` body, falling back to the raw
/// reply text if the model didn't wrap it (models are not perfectly
/// obedient to formatting instructions).
fn extract_summary(text: &str) -> String {
    let open = "<summary>";
    let close = "</summary>";
    if let (Some(start), Some(end)) = (text.find(open), text.find(close)) {
        if end > start {
            return text[start + open.len()..end].trim().to_string();
        }
    }
    text.trim().to_string()
}

/// Runs compaction against `thread` if, and only if, its accumulated usage
/// exceeds `config.token_threshold`. Non-fatal on model failure: logs and
/// leaves the thread uncompacted (§7: compaction failures degrade rather
/// than abort the turn).
pub async fn maybe_compact(
    model: &dyn Model,
    thread: &Thread,
    config: &CompactionConfig,
    policy: &dyn CompactionPolicy,
) -> Option<CompactionRecord> {
    let usage = thread.usage().await;
    if usage.total() < config.token_threshold {
        return None;
    }

    let messages = thread.snapshot().await;
    let keep_from = policy.keep_from_index(&messages);
    if keep_from == 0 {
        return None;
    }

    let tokens_before = estimate_tokens(&messages[..keep_from]);
    let to_summarize = &messages[..keep_from];

    let summarize_options = ModelOptions {
        tool_choice: ToolChoice::None,
        ..ModelOptions::default()
    };

    let response = match model
        .generate(to_summarize, &config.summarization_prompt, &[], &summarize_options)
        .await
    {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(error = %error, "compaction summarization call failed, leaving thread uncompacted");
            return None;
        }
    };

    let raw_text = response
        .message
        .content
        .iter()
        .filter_map(|b| b.as_text())
        .collect::<Vec<_>>()
        .join("\n");
    let summary_text = extract_summary(&raw_text);
    let summary_message = Message::user(format!("<summary>{summary_text}</summary>"));

    let tokens_after = estimate_tokens(std::slice::from_ref(&summary_message));

    thread
        .replace_prefix(keep_from, summary_message, tokens_before, tokens_after)
        .await
}
