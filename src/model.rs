//! Abstract contract for calling a language model, plus one concrete
//! OpenAI-compatible streaming adapter.
//!
//! The adapter's wire format (`OpenAiChunk` and friends) is private to this
//! module: the rest of the engine only ever sees [`Event`], so a different
//! provider's adapter can be dropped in without touching the accumulator,
//! the engine, or the data model.

use crate::error::ModelError;
use crate::types::Message;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// How the model should pick among the offered tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    Auto,
    Any,
    Named(String),
    None,
}

/// Whether and how to hint the provider about prompt caching. Left opaque;
/// the concrete adapter decides what, if anything, to do with it (see
/// DESIGN.md's cache-control open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachingHint {
    #[default]
    None,
    Ephemeral,
}

/// Per-call generation knobs (§4.1).
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
    pub reasoning_budget: Option<u32>,
    pub prefill: Option<String>,
    pub prefill_closing_tag: Option<String>,
    pub caching_hint: CachingHint,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 1.0,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
            reasoning_budget: None,
            prefill: None,
            prefill_closing_tag: None,
            caching_hint: CachingHint::None,
        }
    }
}

/// A tool definition as presented to the model (name/description/schema
/// only — the handler and annotations in [`crate::tools::Tool`] are engine-
/// side concerns the model never sees).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// The declared type of a content block as it is opened mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolUse,
    Image,
    Document,
}

/// A kind of partial content carried by a `content_block_delta` event.
#[derive(Debug, Clone)]
pub enum Delta {
    Text(String),
    Thinking(String),
    /// A fragment of a tool_use input's JSON, concatenated until
    /// `content_block_stop`, at which point it is parsed as one value.
    PartialJson(String),
    /// Overwrites the thinking block's signature exactly once.
    Signature(String),
}

/// One event from a model's streaming response (§4.1).
#[derive(Debug, Clone)]
pub enum Event {
    MessageStart,
    ContentBlockStart { index: u32, kind: BlockKind, tool_name: Option<String>, tool_id: Option<String> },
    ContentBlockDelta { index: u32, delta: Delta },
    ContentBlockStop { index: u32 },
    MessageDelta { stop_reason: String },
    MessageStop,
    Error(ModelError),
}

/// A non-streaming call's result.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub message: Message,
    pub usage: crate::types::Usage,
    pub stop_reason: String,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Abstract model contract. `stream`'s iterator is lazy, finite, and
/// non-restartable; dropping it before exhaustion must cancel the upstream
/// request, which the concrete adapter achieves by dropping the underlying
/// HTTP response body.
#[async_trait]
pub trait Model: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSpec],
        options: &ModelOptions,
    ) -> Result<GenerateResponse, ModelError>;

    async fn stream(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSpec],
        options: &ModelOptions,
    ) -> Result<EventStream, ModelError>;
}

// ============================================================================
// OpenAI-compatible adapter
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct OaMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OaToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OaFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OaFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct OaRequest {
    model: String,
    messages: Vec<OaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OaChunk {
    choices: Vec<OaChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OaChoice {
    delta: OaDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OaDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OaToolCallDelta>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OaToolCallDelta {
    index: u32,
    id: Option<String>,
    function: Option<OaFunctionDelta>,
}

#[derive(Debug, Clone, Deserialize)]
struct OaFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

/// Flattens the crate's structured [`Message`] content blocks into the
/// single-string form OpenAI-compatible chat completion endpoints expect.
/// Thinking and image/document blocks have no wire representation here and
/// are dropped — a concrete Anthropic-style adapter would instead carry
/// them through as first-class fields.
fn to_openai_message(message: &Message) -> Vec<OaMessage> {
    use crate::types::{ContentBlock, MessageRole};

    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };

    let mut tool_results = Vec::new();
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text(t) => text_parts.push(t.text.clone()),
            ContentBlock::Thinking(_) => {}
            ContentBlock::ToolUse(t) => tool_calls.push(OaToolCall {
                id: t.id.clone(),
                call_type: "function".into(),
                function: OaFunction {
                    name: t.name.clone(),
                    arguments: t.input.to_string(),
                },
            }),
            ContentBlock::ToolResult(r) => {
                let text = r
                    .content
                    .iter()
                    .filter_map(ContentBlock::as_text)
                    .collect::<Vec<_>>()
                    .join("\n");
                tool_results.push(OaMessage {
                    role: "tool".into(),
                    content: Some(text),
                    tool_calls: None,
                    tool_call_id: Some(r.tool_use_id.clone()),
                });
            }
            ContentBlock::Image(_) | ContentBlock::Document(_) => {}
        }
    }

    if !tool_results.is_empty() {
        return tool_results;
    }

    vec![OaMessage {
        role: role.into(),
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        },
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
        tool_call_id: None,
    }]
}

/// Streaming model implementation talking to any OpenAI-compatible chat
/// completions endpoint (LMStudio, Ollama, llama.cpp, vLLM, OpenAI itself).
pub struct OpenAiCompatibleModel {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompatibleModel {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn build_request(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSpec],
        options: &ModelOptions,
    ) -> OaRequest {
        let mut oa_messages = vec![OaMessage {
            role: "system".into(),
            content: Some(system_prompt.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }];
        for message in messages {
            oa_messages.extend(to_openai_message(message));
        }

        let oa_tools = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.input_schema,
                            }
                        })
                    })
                    .collect(),
            )
        };

        OaRequest {
            model: self.model.clone(),
            messages: oa_messages,
            stream: true,
            max_tokens: Some(options.max_tokens),
            temperature: Some(options.temperature),
            tools: oa_tools,
        }
    }

    fn classify_http_error(err: &reqwest::Error) -> ModelError {
        if err.is_timeout() || err.is_connect() {
            ModelError::Transient(err.to_string())
        } else if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                ModelError::RateLimited(err.to_string())
            } else if status.is_server_error() {
                ModelError::Transient(err.to_string())
            } else {
                ModelError::Invalid(err.to_string())
            }
        } else {
            ModelError::Transient(err.to_string())
        }
    }
}

fn parse_sse(body: reqwest::Response) -> Pin<Box<dyn Stream<Item = Result<OaChunk, ModelError>> + Send>> {
    let stream = body.bytes_stream().filter_map(move |result| async move {
        let bytes = match result {
            Ok(b) => b,
            Err(e) => return Some(Err(OpenAiCompatibleModel::classify_http_error(&e))),
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();
        for line in text.lines() {
            if let Some(data) = line.strip_prefix("data: ") {
                if data == "[DONE]" {
                    continue;
                }
                return Some(
                    serde_json::from_str::<OaChunk>(data)
                        .map_err(|e| ModelError::Invalid(format!("bad stream chunk: {e}"))),
                );
            }
        }
        None
    });
    Box::pin(stream)
}

#[async_trait]
impl Model for OpenAiCompatibleModel {
    async fn generate(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSpec],
        options: &ModelOptions,
    ) -> Result<GenerateResponse, ModelError> {
        let mut events = self.stream(messages, system_prompt, tools, options).await?;
        let mut accumulator = crate::accumulator::StreamAccumulator::new(options.clone());
        while let Some(event) = events.next().await {
            if let Event::Error(e) = event {
                return Err(e);
            }
            accumulator.ingest(event);
        }
        let sealed = accumulator.seal();
        Ok(GenerateResponse {
            message: sealed.message,
            usage: sealed.usage,
            stop_reason: sealed.stop_reason,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        system_prompt: &str,
        tools: &[ToolSpec],
        options: &ModelOptions,
    ) -> Result<EventStream, ModelError> {
        let request = self.build_request(messages, system_prompt, tools, options);
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify_http_error(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let kind = if status.as_u16() == 429 {
                ModelError::RateLimited(format!("status {status}"))
            } else if status.is_server_error() {
                ModelError::Transient(format!("status {status}"))
            } else {
                ModelError::Invalid(format!("status {status}"))
            };
            return Err(kind);
        }

        let chunks = parse_sse(response);
        let state = ChunkTranslateState::default();
        let translated = chunks.scan(state, |state, chunk| {
            if state.errored {
                return futures::future::ready(None);
            }
            let events = match chunk {
                Ok(c) => state.translate(c),
                Err(e) => {
                    state.errored = true;
                    vec![Event::Error(e)]
                }
            };
            futures::future::ready(Some(events))
        });

        let body = futures::stream::once(futures::future::ready(vec![Event::MessageStart]))
            .chain(translated)
            .flat_map(futures::stream::iter);

        Ok(Box::pin(body))
    }
}

/// Tracks index assignment while translating OpenAI-shaped chunks into the
/// abstract [`Event`] stream: one block index per text run and one per
/// tool-call slot, allocated the first time each is seen.
#[derive(Default)]
struct ChunkTranslateState {
    tool_index_to_block_index: std::collections::HashMap<u32, u32>,
    next_index: u32,
    text_block_index: Option<u32>,
    errored: bool,
}

impl ChunkTranslateState {
    fn translate(&mut self, chunk: OaChunk) -> Vec<Event> {
        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                let first_delta_for_block = self.text_block_index.is_none();
                let index = *self.text_block_index.get_or_insert_with(|| {
                    let i = self.next_index;
                    self.next_index += 1;
                    i
                });
                if first_delta_for_block {
                    events.push(Event::ContentBlockStart {
                        index,
                        kind: BlockKind::Text,
                        tool_name: None,
                        tool_id: None,
                    });
                }
                events.push(Event::ContentBlockDelta {
                    index,
                    delta: Delta::Text(content),
                });
            }
            if let Some(tool_calls) = choice.delta.tool_calls {
                for tc in tool_calls {
                    let next_index = &mut self.next_index;
                    let first_delta_for_block = !self.tool_index_to_block_index.contains_key(&tc.index);
                    let index = *self
                        .tool_index_to_block_index
                        .entry(tc.index)
                        .or_insert_with(|| {
                            let i = *next_index;
                            *next_index += 1;
                            i
                        });
                    let tool_name = tc.function.as_ref().and_then(|f| f.name.clone());
                    if first_delta_for_block {
                        events.push(Event::ContentBlockStart {
                            index,
                            kind: BlockKind::ToolUse,
                            tool_name,
                            tool_id: tc.id,
                        });
                    }
                    if let Some(function) = tc.function {
                        if let Some(args) = function.arguments {
                            events.push(Event::ContentBlockDelta {
                                index,
                                delta: Delta::PartialJson(args),
                            });
                        }
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                for index in 0..self.next_index {
                    events.push(Event::ContentBlockStop { index });
                }
                events.push(Event::MessageDelta { stop_reason: reason });
                events.push(Event::MessageStop);
            }
        }
        events
    }
}
