//! Assembles a model's event stream into a sealed [`Message`] (§4.2).
//!
//! Generalizes the teacher SDK's `ToolCallAggregator` (which only ever
//! aggregated text and tool-call deltas keyed by a flat index) to all block
//! kinds, keyed by the same index scheme, with thinking-signature and
//! prefill handling layered on top.

use crate::model::{BlockKind, Delta, Event, ModelOptions};
use crate::types::{ContentBlock, Message, MessageRole, TextBlock, ThinkingBlock, ToolUseBlock, Usage};
use std::collections::BTreeMap;

#[derive(Debug)]
enum PendingBlock {
    Text(String),
    Thinking { text: String, signature: Option<String> },
    ToolUse { id: String, name: String, json_buffer: String },
}

/// A block that failed to seal (currently only malformed tool_use JSON).
#[derive(Debug, Clone)]
pub struct BlockError {
    pub index: u32,
    pub message: String,
}

/// The accumulator's output once `message_stop` has been observed.
pub struct Sealed {
    pub message: Message,
    pub usage: Usage,
    pub stop_reason: String,
    /// Non-fatal per-block failures (invariant: engine turns these into
    /// tool-result errors instead of dispatching).
    pub block_errors: Vec<BlockError>,
}

/// Stateful, single-turn accumulator. One instance per model call.
pub struct StreamAccumulator {
    blocks: BTreeMap<u32, PendingBlock>,
    order: Vec<u32>,
    stop_reason: String,
    prefill: Option<String>,
    prefill_closing_tag: Option<String>,
    saw_any_block: bool,
    errored_mid_stream: bool,
}

impl StreamAccumulator {
    pub fn new(options: ModelOptions) -> Self {
        Self {
            blocks: BTreeMap::new(),
            order: Vec::new(),
            stop_reason: String::new(),
            prefill: options.prefill,
            prefill_closing_tag: options.prefill_closing_tag,
            saw_any_block: false,
            errored_mid_stream: false,
        }
    }

    /// Feeds one event into the accumulator. Call `seal` once `MessageStop`
    /// (or `Error`) has been observed.
    pub fn ingest(&mut self, event: Event) {
        match event {
            Event::MessageStart => {}
            Event::ContentBlockStart { index, kind, tool_name, tool_id } => {
                self.saw_any_block = true;
                if !self.order.contains(&index) {
                    self.order.push(index);
                }
                let pending = match kind {
                    BlockKind::Text => PendingBlock::Text(String::new()),
                    BlockKind::Thinking => PendingBlock::Thinking {
                        text: String::new(),
                        signature: None,
                    },
                    BlockKind::ToolUse => PendingBlock::ToolUse {
                        id: tool_id.unwrap_or_default(),
                        name: tool_name.unwrap_or_default(),
                        json_buffer: String::new(),
                    },
                    BlockKind::Image | BlockKind::Document => {
                        // Opaque media has no streamed deltas in this model
                        // interface; treated as an immediately-empty text
                        // block so later stop handling is uniform.
                        PendingBlock::Text(String::new())
                    }
                };
                self.blocks.insert(index, pending);
            }
            Event::ContentBlockDelta { index, delta } => {
                if let Some(block) = self.blocks.get_mut(&index) {
                    apply_delta(block, delta);
                }
            }
            Event::ContentBlockStop { .. } => {
                // Sealing of individual blocks (JSON parse) happens in `seal`
                // so a mid-stream error can still discard unparsed buffers
                // without losing already-sealed text.
            }
            Event::MessageDelta { stop_reason } => {
                self.stop_reason = stop_reason;
            }
            Event::MessageStop => {}
            Event::Error(_) => {
                self.errored_mid_stream = true;
            }
        }
    }

    /// Seals the assistant message: blocks sorted by index, empty text
    /// blocks discarded, prefill applied, malformed tool_use JSON reported
    /// as a block error rather than dispatched.
    pub fn seal(mut self) -> Sealed {
        let mut content = Vec::new();
        let mut block_errors = Vec::new();
        let mut prefill_applied = false;

        self.order.sort_unstable();
        for index in self.order {
            let Some(block) = self.blocks.remove(&index) else {
                continue;
            };
            match block {
                PendingBlock::Text(mut text) => {
                    if !prefill_applied {
                        if let Some(prefill) = self.prefill.take() {
                            let should_apply = match &self.prefill_closing_tag {
                                Some(tag) => text.contains(tag.as_str()) || text.is_empty(),
                                None => true,
                            };
                            if should_apply {
                                text = format!("{prefill}{text}");
                                prefill_applied = true;
                            }
                        }
                    }
                    if !text.is_empty() {
                        content.push(ContentBlock::Text(TextBlock::new(text)));
                    }
                }
                PendingBlock::Thinking { text, signature } => {
                    content.push(ContentBlock::Thinking(ThinkingBlock {
                        thinking: text,
                        signature,
                    }));
                }
                PendingBlock::ToolUse { id, name, json_buffer } => {
                    if self.errored_mid_stream {
                        // Partial tool_use JSON is discarded on a mid-stream
                        // error; only completed text is preserved.
                        continue;
                    }
                    let input = if json_buffer.trim().is_empty() {
                        serde_json::json!({})
                    } else {
                        match serde_json::from_str(&json_buffer) {
                            Ok(v) => v,
                            Err(e) => {
                                block_errors.push(BlockError {
                                    index,
                                    message: format!("invalid tool_use arguments: {e}"),
                                });
                                continue;
                            }
                        }
                    };
                    content.push(ContentBlock::ToolUse(ToolUseBlock::new(id, name, input)));
                }
            }
        }

        let message = Message::new(MessageRole::Assistant, content);

        Sealed {
            message,
            usage: Usage::default(),
            stop_reason: self.stop_reason,
            block_errors,
        }
    }
}

fn apply_delta(block: &mut PendingBlock, delta: Delta) {
    match (block, delta) {
        (PendingBlock::Text(buf), Delta::Text(d)) => buf.push_str(&d),
        (PendingBlock::Thinking { text, .. }, Delta::Thinking(d)) => text.push_str(&d),
        (PendingBlock::Thinking { signature, .. }, Delta::Signature(sig)) => {
            // Overwritten exactly once: a signature delta only ever arrives
            // a single time per thinking block in the providers this
            // abstracts over, so last-write-wins is equivalent to
            // write-once here.
            *signature = Some(sig);
        }
        (PendingBlock::ToolUse { json_buffer, .. }, Delta::PartialJson(d)) => {
            json_buffer.push_str(&d);
        }
        _ => {}
    }
}
