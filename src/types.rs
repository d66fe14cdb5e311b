//! Core data model for the agent response engine: messages and their content
//! blocks, threads, tool calls/results, usage accounting, response items, and
//! permission rules.
//!
//! Three newtype wrappers (`ModelName`, `BaseUrl`, `Temperature`) validate at
//! construction rather than at call time, the way the rest of this crate's
//! configuration surface does.

use crate::Error;
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATED NEWTYPES
// ============================================================================

/// A non-empty model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelName(String);

impl ModelName {
    /// Creates a new `ModelName` after validation.
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::invalid_input("model name cannot be empty"));
        }
        Ok(ModelName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A base URL that must use the `http://` or `https://` scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> crate::Result<Self> {
        let url = url.into();
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_input("base_url cannot be empty"));
        }
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(Error::invalid_input(
                "base_url must start with http:// or https://",
            ));
        }
        Ok(BaseUrl(url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sampling temperature clamped to `[0.0, 2.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature(f32);

impl Temperature {
    pub fn new(temp: f32) -> crate::Result<Self> {
        if !(0.0..=2.0).contains(&temp) {
            return Err(Error::invalid_input(
                "temperature must be between 0.0 and 2.0",
            ));
        }
        Ok(Temperature(temp))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

// ============================================================================
// MESSAGES & CONTENT BLOCKS
// ============================================================================

/// Who produced a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A source descriptor for opaque media (`image`/`document` blocks).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    Url { url: String },
    Base64 { media_type: String, data: String },
}

/// Free-form text content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Opaque model reasoning. The `signature` is provider-issued and must be
/// preserved verbatim (invariant M3); the engine never inspects or alters it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThinkingBlock {
    pub thinking: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// A model-emitted request to invoke a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Unique within the assistant message that emitted it.
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolUseBlock {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// The engine's reply to a prior `tool_use`, fed back as a user-role message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub tool_use_id: String,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl ToolResultBlock {
    pub fn ok(tool_use_id: impl Into<String>, content: Vec<ContentBlock>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            is_error: false,
            display: None,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            tool_use_id: tool_use_id.into(),
            content: vec![ContentBlock::Text(TextBlock::new(message.clone()))],
            is_error: true,
            display: Some(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub source: MediaSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentBlock {
    pub source: MediaSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A discriminated element of a message's content list.
///
/// Tagged by `type` so unknown-field round-tripping (§6.2) stays stable
/// across provider variations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Thinking(ThinkingBlock),
    ToolUse(ToolUseBlock),
    ToolResult(ToolResultBlock),
    Image(ImageBlock),
    Document(DocumentBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(TextBlock::new(text))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text(t) => Some(&t.text),
            _ => None,
        }
    }

    pub fn as_tool_use(&self) -> Option<&ToolUseBlock> {
        match self {
            ContentBlock::ToolUse(t) => Some(t),
            _ => None,
        }
    }
}

/// One turn's content: a role plus an ordered list of content blocks.
///
/// Messages are never mutated once appended to a thread, except that the
/// assistant message being streamed accumulates blocks before it is sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: vec![ContentBlock::text(text)],
        }
    }

    /// Builds the follow-up user message carrying tool results, in the same
    /// order as the `tool_use` blocks that triggered them (invariant M1).
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: MessageRole::User,
            content: results.into_iter().map(ContentBlock::ToolResult).collect(),
        }
    }

    /// The `tool_use` blocks in this message, in emission order.
    pub fn tool_uses(&self) -> impl Iterator<Item = &ToolUseBlock> {
        self.content.iter().filter_map(ContentBlock::as_tool_use)
    }

    pub fn has_tool_uses(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse(_)))
    }
}

// ============================================================================
// TOOL CALLS & RESULTS
// ============================================================================

/// A staged tool invocation pulled out of an assistant message during
/// triage (S2/S3), tracking which message it came from.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub source_message_index: usize,
}

/// The outcome of dispatching a [`ToolCall`].
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub id: String,
    pub content_blocks: Vec<ContentBlock>,
    pub display: Option<String>,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, content_blocks: Vec<ContentBlock>) -> Self {
        Self {
            id: id.into(),
            content_blocks,
            display: None,
            is_error: false,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: id.into(),
            content_blocks: vec![ContentBlock::text(message.clone())],
            display: Some(message),
            is_error: true,
        }
    }

    pub fn into_block(self) -> ToolResultBlock {
        ToolResultBlock {
            tool_use_id: self.id,
            content: self.content_blocks,
            is_error: self.is_error,
            display: self.display,
        }
    }
}

// ============================================================================
// USAGE
// ============================================================================

/// Cumulative token accounting for a turn or a thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl Usage {
    /// Total tokens counted toward the compaction threshold (§4.7).
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_tokens += other.cache_creation_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
    }
}

// ============================================================================
// RESPONSE ITEMS
// ============================================================================

/// A tagged emission from the engine to its caller.
///
/// Ordering within a turn: zero-or-more `ModelEvent` → `Message` → zero-or-
/// more (`ToolCall` → `ToolCallResult`) → repeat → terminal `Done`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    /// A raw streaming delta, passed through for UIs that want to render
    /// incrementally.
    ModelEvent { index: u32, delta: String },
    /// A completed assistant message, sealed by the accumulator.
    Message { message: Message },
    /// A tool dispatch has been queued.
    ToolCall { id: String, name: String, input: serde_json::Value },
    /// A tool dispatch has completed.
    ToolCallResult {
        id: String,
        is_error: bool,
        display: Option<String>,
    },
    /// A compaction ran against the thread.
    Compaction {
        tokens_before: u64,
        tokens_after: u64,
        messages_compacted: usize,
    },
    /// The turn has finished.
    Done { canceled: bool },
}

// ============================================================================
// PERMISSIONS
// ============================================================================

/// What a [`PermissionRule`] does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionEffect {
    Allow,
    Ask,
    Deny,
}

/// Engine-wide permission posture, adjustable per call (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// A pattern-matched allow/ask/deny rule.
///
/// `pattern` matches a tool name; `input_prefix`, if set, additionally
/// requires a named input field to start with the given string (the classic
/// "`bash` with command prefix `git `" case from §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    pub tool_name: String,
    pub effect: PermissionEffect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PermissionRule {
    pub fn allow(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            effect: PermissionEffect::Allow,
            input_field: None,
            input_prefix: None,
            reason: None,
        }
    }

    pub fn ask(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            effect: PermissionEffect::Ask,
            input_field: None,
            input_prefix: None,
            reason: None,
        }
    }

    pub fn deny(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            effect: PermissionEffect::Deny,
            input_field: None,
            input_prefix: None,
            reason: None,
        }
    }

    pub fn with_input_prefix(mut self, field: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.input_field = Some(field.into());
        self.input_prefix = Some(prefix.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ============================================================================
// COMPACTION
// ============================================================================

/// One entry in a thread's append-only `compaction_log`. Not part of the
/// model prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionRecord {
    pub timestamp_millis: u64,
    pub tokens_before: u64,
    pub tokens_after: u64,
    pub messages_compacted: usize,
}
