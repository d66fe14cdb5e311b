//! Agent Response Engine: the S0-S5 turn state machine (§4.8).
//!
//! Generalizes the teacher SDK's `Client::auto_execute_loop` — a single
//! `Vec`-buffered send/receive/tool loop — into an explicit per-state
//! progression with permission gating, user confirmation, bounded parallel
//! dispatch, cancellation, and compaction, shaped after a production agent
//! loop's driver/builder split.

use crate::accumulator::StreamAccumulator;
use crate::compactor::{self, CompactionConfig, CompactionPolicy, SummarizeAll};
use crate::error::{ModelError, ToolError};
use crate::interactor::{ConfirmRequest, InputRequest, Interactor, SelectRequest, ASK_USER_TOOL_NAME};
use crate::model::{Model, ModelOptions, ToolChoice as ModelToolChoice, ToolSpec};
use crate::permission::{Decision, PermissionEngine};
use crate::retry::{retry_model_call, RetryConfig};
use crate::thread::Thread;
use crate::tools::{Tool, TurnContext};
use crate::types::{ContentBlock, Message, MessageRole, PermissionMode, ResponseItem, ToolResultBlock, Usage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Which tools a turn may call (§6.1's `tool_choice`).
#[derive(Debug, Clone, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    Any,
    Named(String),
    None,
}

/// Per-call overrides to the model's sampling knobs (§6.1's `model_settings`).
#[derive(Debug, Clone, Default)]
pub struct ModelSettings {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub reasoning_budget: Option<u32>,
}

/// A callback invoked synchronously, in emission order, for every
/// `ResponseItem` the engine produces. Returning an error cancels the turn
/// (§6.1).
pub type EventCallback = Box<dyn FnMut(&ResponseItem) -> Result<(), String> + Send>;

/// Arguments to [`Engine::create_response`].
pub struct CreateResponseOptions {
    pub input: String,
    pub thread_id: String,
    pub tool_choice: ToolChoice,
    pub model_settings: ModelSettings,
    pub event_callback: Option<EventCallback>,
    pub permission_mode_override: Option<PermissionMode>,
}

impl Default for CreateResponseOptions {
    fn default() -> Self {
        Self {
            input: String::new(),
            thread_id: "main".to_string(),
            tool_choice: ToolChoice::default(),
            model_settings: ModelSettings::default(),
            event_callback: None,
            permission_mode_override: None,
        }
    }
}

/// The result of one `create_response` call (§6.1).
pub struct Response {
    pub final_message: Option<Message>,
    pub items: Vec<ResponseItem>,
    pub usage: Usage,
    pub canceled: bool,
}

/// Owns the model, tool registry, permission policy, and interactor for one
/// logical agent. Threads are looked up per call, not owned by the engine.
pub struct Engine {
    model: Arc<dyn Model>,
    tools: HashMap<String, Tool>,
    system_prompt: String,
    permission_engine: PermissionEngine,
    interactor: Interactor,
    compaction_config: CompactionConfig,
    compaction_policy: Arc<dyn CompactionPolicy>,
    retry_config: RetryConfig,
    max_turns: u32,
    max_parallel_tool_calls: usize,
}

impl Engine {
    pub fn new(model: Arc<dyn Model>, system_prompt: impl Into<String>) -> Self {
        Self {
            model,
            tools: HashMap::new(),
            system_prompt: system_prompt.into(),
            permission_engine: PermissionEngine::new(PermissionMode::Default),
            interactor: Interactor::null(),
            compaction_config: CompactionConfig::default(),
            compaction_policy: Arc::new(SummarizeAll),
            retry_config: RetryConfig::default(),
            max_turns: 25,
            max_parallel_tool_calls: 8,
        }
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_permission_engine(mut self, engine: PermissionEngine) -> Self {
        self.permission_engine = engine;
        self
    }

    pub fn with_interactor(mut self, interactor: Interactor) -> Self {
        self.interactor = interactor;
        self
    }

    pub fn with_compaction(mut self, config: CompactionConfig, policy: Arc<dyn CompactionPolicy>) -> Self {
        self.compaction_config = config;
        self.compaction_policy = policy;
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_max_parallel_tool_calls(mut self, max: usize) -> Self {
        self.max_parallel_tool_calls = max;
        self
    }

    /// User-registered tools plus the engine's own `ask_user` gateway tool
    /// (§4.5: "the engine exposes `select` and `input` to the model as
    /// ordinary tools"), unless the caller already registered a tool under
    /// that name, in which case theirs takes precedence.
    fn tool_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(Tool::spec).collect();
        if !self.tools.contains_key(ASK_USER_TOOL_NAME) {
            specs.push(ask_user_tool_spec());
        }
        specs
    }

    /// Runs one turn of the S0-S5 state machine against `thread`, driven by
    /// `options.input`, until the model stops requesting tools, the turn
    /// budget is exhausted, or `cancel` is observed.
    pub async fn create_response(
        &self,
        thread: &Thread,
        mut options: CreateResponseOptions,
        cancel: Arc<AtomicBool>,
    ) -> Result<Response, crate::error::Error> {
        let mut items = Vec::new();
        let mut emit = |item: ResponseItem, items: &mut Vec<ResponseItem>| -> Result<(), String> {
            if let Some(callback) = options.event_callback.as_mut() {
                callback(&item)?;
            }
            items.push(item);
            Ok(())
        };

        // §6.4: permission mode is adjustable per-call, layered on top of the
        // engine's configured rules rather than replacing them.
        let permission_engine: std::borrow::Cow<'_, PermissionEngine> =
            match options.permission_mode_override {
                Some(mode) => {
                    let mut overridden = self.permission_engine.clone();
                    overridden.set_mode(mode);
                    std::borrow::Cow::Owned(overridden)
                }
                None => std::borrow::Cow::Borrowed(&self.permission_engine),
            };

        // S0 Start: append the user message, then compact if the thread has
        // grown past the configured threshold.
        thread
            .append(vec![Message::user(options.input.clone())], Usage::default())
            .await;

        if let Some(record) = compactor::maybe_compact(
            self.model.as_ref(),
            thread,
            &self.compaction_config,
            self.compaction_policy.as_ref(),
        )
        .await
        {
            emit(
                ResponseItem::Compaction {
                    tokens_before: record.tokens_before,
                    tokens_after: record.tokens_after,
                    messages_compacted: record.messages_compacted,
                },
                &mut items,
            )
            .map_err(crate::error::Error::other)?;
        }

        let mut final_message = None;
        let mut turn = 0u32;

        loop {
            if cancel.load(Ordering::SeqCst) {
                emit(ResponseItem::Done { canceled: true }, &mut items)
                    .map_err(crate::error::Error::other)?;
                return Ok(Response {
                    final_message,
                    items,
                    usage: thread.usage().await,
                    canceled: true,
                });
            }

            turn += 1;
            tracing::debug!(thread_id = %thread.id, turn, "starting turn");
            if turn > self.max_turns {
                thread
                    .append(
                        vec![Message::system(format!(
                            "turn budget of {} iterations exceeded; stopping",
                            self.max_turns
                        ))],
                        Usage::default(),
                    )
                    .await;
                emit(ResponseItem::Done { canceled: false }, &mut items)
                    .map_err(crate::error::Error::other)?;
                break;
            }

            // S1 Model Call
            let messages = thread.snapshot().await;
            let model_options = self.model_options(&options.model_settings, &options.tool_choice);
            let tool_specs = if matches!(options.tool_choice, ToolChoice::None) {
                Vec::new()
            } else {
                self.tool_specs()
            };

            let model = self.model.clone();
            let sys_prompt = self.system_prompt.clone();
            let retry_config = self.retry_config.clone();
            let stream_result = retry_model_call(&retry_config, || {
                let model = model.clone();
                let messages = messages.clone();
                let sys_prompt = sys_prompt.clone();
                let tool_specs = tool_specs.clone();
                let model_options = model_options.clone();
                async move { model.stream(&messages, &sys_prompt, &tool_specs, &model_options).await }
            })
            .await;

            let event_stream = match stream_result {
                Ok(stream) => stream,
                Err(error) => return Err(crate::error::Error::Model(error)),
            };

            let mut accumulator = StreamAccumulator::new(model_options.clone());
            let mut event_stream = event_stream;
            use futures::StreamExt;
            while let Some(event) = event_stream.next().await {
                if cancel.load(Ordering::SeqCst) {
                    break;
                }
                if let crate::model::Event::ContentBlockDelta { index, delta } = &event {
                    let text = match delta {
                        crate::model::Delta::Text(t) => t.clone(),
                        crate::model::Delta::Thinking(t) => t.clone(),
                        crate::model::Delta::PartialJson(t) => t.clone(),
                        crate::model::Delta::Signature(_) => String::new(),
                    };
                    if !text.is_empty() {
                        emit(ResponseItem::ModelEvent { index: *index, delta: text }, &mut items)
                            .map_err(crate::error::Error::other)?;
                    }
                }
                accumulator.ingest(event);
            }

            let sealed = accumulator.seal();
            let assistant_message = sealed.message;
            thread.append(vec![assistant_message.clone()], sealed.usage).await;
            emit(
                ResponseItem::Message { message: assistant_message.clone() },
                &mut items,
            )
            .map_err(crate::error::Error::other)?;
            final_message = Some(assistant_message.clone());

            if cancel.load(Ordering::SeqCst) {
                emit(ResponseItem::Done { canceled: true }, &mut items)
                    .map_err(crate::error::Error::other)?;
                return Ok(Response {
                    final_message,
                    items,
                    usage: thread.usage().await,
                    canceled: true,
                });
            }

            // S2 Triage
            let tool_uses: Vec<_> = assistant_message.tool_uses().cloned().collect();
            if tool_uses.is_empty() {
                emit(ResponseItem::Done { canceled: false }, &mut items)
                    .map_err(crate::error::Error::other)?;
                break;
            }

            // S3 Permission
            let mut approved = Vec::new();
            let mut staged_results: Vec<Option<ToolResultBlock>> = vec![None; tool_uses.len()];

            for (i, tool_use) in tool_uses.iter().enumerate() {
                // The built-in `ask_user` gateway tool routes straight back
                // to the interactor; it isn't gated like an ordinary tool
                // call (the interactor's own confirm/select/input handlers
                // are the user-facing checkpoint). A caller-registered tool
                // of the same name overrides this and goes through normal
                // permission evaluation instead.
                if tool_use.name == ASK_USER_TOOL_NAME && !self.tools.contains_key(ASK_USER_TOOL_NAME) {
                    approved.push(i);
                    continue;
                }

                let annotations = self
                    .tools
                    .get(&tool_use.name)
                    .map(Tool::annotations)
                    .unwrap_or_default();

                let decision = permission_engine.evaluate(&tool_use.name, &tool_use.input, annotations);

                match decision {
                    Decision::Deny { reason } => {
                        tracing::warn!(tool = %tool_use.name, %reason, "tool call denied");
                        staged_results[i] = Some(ToolResultBlock::error(&tool_use.id, reason));
                    }
                    Decision::Ask => {
                        let approved_by_user = self
                            .interactor
                            .confirm(ConfirmRequest {
                                tool_name: tool_use.name.clone(),
                                input: tool_use.input.clone(),
                                reason: None,
                            })
                            .await;
                        if cancel.load(Ordering::SeqCst) || !approved_by_user {
                            staged_results[i] =
                                Some(ToolResultBlock::error(&tool_use.id, "user canceled"));
                        } else {
                            approved.push(i);
                        }
                    }
                    Decision::Allow => approved.push(i),
                }
            }

            // S4 Dispatch
            let all_reentrant = approved.iter().all(|&i| {
                self.tools
                    .get(&tool_uses[i].name)
                    .map(|t| t.annotations().reentrant)
                    .unwrap_or(false)
            });
            let dispatch_parallel =
                approved.len() > 1 && model_options.parallel_tool_calls && all_reentrant;

            let interactor = &self.interactor;
            let dispatched: Vec<(usize, ToolResultBlock)> = if dispatch_parallel {
                let chunks = approved.chunks(self.max_parallel_tool_calls.max(1));
                let mut out = Vec::new();
                for chunk in chunks {
                    let futures = chunk.iter().map(|&i| {
                        let tool_use = tool_uses[i].clone();
                        let ctx = TurnContext::new(thread.id.clone(), cancel.clone());
                        let tool = self.tools.get(&tool_use.name).cloned();
                        async move {
                            let result = dispatch_approved(tool, interactor, ctx, &tool_use).await;
                            (i, result)
                        }
                    });
                    out.extend(futures::future::join_all(futures).await);
                }
                out
            } else {
                let mut out = Vec::new();
                for &i in &approved {
                    let tool_use = tool_uses[i].clone();
                    let ctx = TurnContext::new(thread.id.clone(), cancel.clone());
                    let tool = self.tools.get(&tool_use.name).cloned();
                    let result = dispatch_approved(tool, interactor, ctx, &tool_use).await;
                    out.push((i, result));
                }
                out
            };

            for (i, result_block) in dispatched {
                staged_results[i] = Some(result_block);
            }

            // Every tool_use index is staged by now, either in S3 (denied /
            // user-canceled) or just above (dispatched). Emit each
            // `ToolCall` immediately followed by its own `ToolCallResult`,
            // in tool_use order, so deny/cancel outcomes get a result item
            // too instead of only ever-dispatched tools.
            for (i, tool_use) in tool_uses.iter().enumerate() {
                emit(
                    ResponseItem::ToolCall {
                        id: tool_use.id.clone(),
                        name: tool_use.name.clone(),
                        input: tool_use.input.clone(),
                    },
                    &mut items,
                )
                .map_err(crate::error::Error::other)?;

                let result_block = staged_results[i]
                    .as_ref()
                    .expect("every tool_use index is staged exactly once");
                emit(
                    ResponseItem::ToolCallResult {
                        id: result_block.tool_use_id.clone(),
                        is_error: result_block.is_error,
                        display: result_block.display.clone(),
                    },
                    &mut items,
                )
                .map_err(crate::error::Error::other)?;
            }

            let results: Vec<ToolResultBlock> = staged_results
                .into_iter()
                .map(|r| r.expect("every tool_use index is staged exactly once"))
                .collect();
            thread.append(vec![Message::tool_results(results)], Usage::default()).await;

            // goto S1
        }

        Ok(Response {
            final_message,
            items,
            usage: thread.usage().await,
            canceled: false,
        })
    }

    fn model_options(&self, model_settings: &ModelSettings, tool_choice: &ToolChoice) -> ModelOptions {
        ModelOptions {
            temperature: model_settings.temperature.unwrap_or(1.0),
            max_tokens: model_settings.max_tokens.unwrap_or(4096),
            reasoning_budget: model_settings.reasoning_budget,
            tool_choice: match tool_choice {
                ToolChoice::Auto => ModelToolChoice::Auto,
                ToolChoice::Any => ModelToolChoice::Any,
                ToolChoice::Named(name) => ModelToolChoice::Named(name.clone()),
                ToolChoice::None => ModelToolChoice::None,
            },
            ..ModelOptions::default()
        }
    }
}

/// The schema advertised for the built-in `ask_user` gateway tool (§6.3):
/// free-text mode when `options` is absent, single-choice mode when present.
fn ask_user_tool_spec() -> ToolSpec {
    ToolSpec {
        name: ASK_USER_TOOL_NAME.to_string(),
        description: "Ask the human operator a question and wait for their answer. \
            Omit `options` for a free-text prompt; include `options` for a \
            single-choice prompt."
            .to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "message": {"type": "string"},
                "default": {"type": "string"},
                "options": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": {"type": "string"},
                            "value": {"type": "string"},
                            "description": {"type": "string"},
                            "default": {"type": "boolean"}
                        },
                        "required": ["label"]
                    }
                }
            },
            "required": ["title"]
        }),
    }
}

/// Dispatches one approved tool call, routing the built-in `ask_user` name
/// to the interactor instead of the registered-tools map when the caller
/// hasn't overridden it with their own tool of that name.
async fn dispatch_approved(
    tool: Option<Tool>,
    interactor: &Interactor,
    ctx: TurnContext,
    tool_use: &crate::types::ToolUseBlock,
) -> ToolResultBlock {
    if tool.is_none() && tool_use.name == ASK_USER_TOOL_NAME {
        dispatch_ask_user(interactor, ctx, tool_use).await
    } else {
        dispatch_one(tool, ctx, tool_use).await
    }
}

/// Routes an `ask_user` call to `Interactor::select` when the input carries
/// an `options` array, or `Interactor::input` otherwise (§4.5, §6.3).
async fn dispatch_ask_user(
    interactor: &Interactor,
    ctx: TurnContext,
    tool_use: &crate::types::ToolUseBlock,
) -> ToolResultBlock {
    if ctx.is_canceled() {
        return ToolResultBlock::error(&tool_use.id, "canceled before dispatch");
    }

    let title = tool_use.input.get("title").and_then(Value::as_str).unwrap_or_default();
    let message = tool_use.input.get("message").and_then(Value::as_str);
    let prompt = match message {
        Some(message) => format!("{title}: {message}"),
        None => title.to_string(),
    };

    if let Some(options) = tool_use.input.get("options").and_then(Value::as_array) {
        let values: Vec<String> = options
            .iter()
            .map(|option| {
                let label = option.get("label").and_then(Value::as_str).unwrap_or_default();
                option
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or(label)
                    .to_string()
            })
            .collect();
        let labels: Vec<String> = options
            .iter()
            .map(|option| option.get("label").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect();

        match interactor.select(SelectRequest { prompt, options: labels }).await {
            Some(index) => match values.get(index) {
                Some(value) => ToolResultBlock::ok(&tool_use.id, vec![ContentBlock::text(value)]),
                None => ToolResultBlock::error(&tool_use.id, "selection index out of range"),
            },
            None => ToolResultBlock::error(&tool_use.id, "user canceled"),
        }
    } else {
        let default = tool_use.input.get("default").and_then(Value::as_str).map(str::to_string);
        match interactor.input(InputRequest { prompt, default }).await {
            Some(answer) => ToolResultBlock::ok(&tool_use.id, vec![ContentBlock::text(answer)]),
            None => ToolResultBlock::error(&tool_use.id, "user canceled"),
        }
    }
}

#[tracing::instrument(skip(tool, ctx), fields(tool = %tool_use.name))]
async fn dispatch_one(
    tool: Option<Tool>,
    ctx: TurnContext,
    tool_use: &crate::types::ToolUseBlock,
) -> ToolResultBlock {
    let Some(tool) = tool else {
        tracing::warn!("dispatch requested for an unregistered tool");
        return ToolResultBlock::error(
            &tool_use.id,
            format!("unknown tool '{}'", tool_use.name),
        );
    };

    if ctx.is_canceled() {
        return ToolResultBlock::error(&tool_use.id, "canceled before dispatch");
    }

    match tool.call(ctx, tool_use.input.clone()).await {
        Ok(result) => result.into_block(),
        Err(ToolError { message }) => {
            tracing::warn!(error = %message, "tool call failed");
            ToolResultBlock::error(&tool_use.id, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockKind, Event, EventStream, GenerateResponse};
    use crate::thread::ThreadStore;
    use crate::types::ToolResult;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// A model that replays a scripted sequence of event-vectors, one per
    /// `stream()` call — the S-A..S-F scenario harness.
    struct ScriptedModel {
        turns: Mutex<Vec<Vec<Event>>>,
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn generate(
            &self,
            _: &[Message],
            _: &str,
            _: &[ToolSpec],
            _: &ModelOptions,
        ) -> Result<GenerateResponse, ModelError> {
            unimplemented!("engine always streams")
        }

        async fn stream(
            &self,
            _: &[Message],
            _: &str,
            _: &[ToolSpec],
            _: &ModelOptions,
        ) -> Result<EventStream, ModelError> {
            let mut turns = self.turns.lock().unwrap();
            let events = if turns.is_empty() {
                vec![Event::MessageStop]
            } else {
                turns.remove(0)
            };
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn text_turn(text: &str) -> Vec<Event> {
        vec![
            Event::MessageStart,
            Event::ContentBlockStart { index: 0, kind: BlockKind::Text, tool_name: None, tool_id: None },
            Event::ContentBlockDelta { index: 0, delta: crate::model::Delta::Text(text.to_string()) },
            Event::ContentBlockStop { index: 0 },
            Event::MessageDelta { stop_reason: "end_turn".to_string() },
            Event::MessageStop,
        ]
    }

    fn tool_call_turn(id: &str, name: &str, input_json: &str) -> Vec<Event> {
        vec![
            Event::MessageStart,
            Event::ContentBlockStart {
                index: 0,
                kind: BlockKind::ToolUse,
                tool_name: Some(name.to_string()),
                tool_id: Some(id.to_string()),
            },
            Event::ContentBlockDelta {
                index: 0,
                delta: crate::model::Delta::PartialJson(input_json.to_string()),
            },
            Event::ContentBlockStop { index: 0 },
            Event::MessageDelta { stop_reason: "tool_use".to_string() },
            Event::MessageStop,
        ]
    }

    // Scenario S-A: plain reply, no tools.
    #[tokio::test]
    async fn scenario_plain_reply_emits_message_then_done() {
        let model = Arc::new(ScriptedModel { turns: Mutex::new(vec![text_turn("hello there")]) });
        let engine = Engine::new(model, "be helpful");
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "hi".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert!(!response.canceled);
        assert_eq!(
            response.final_message.unwrap().content[0].as_text(),
            Some("hello there")
        );
        assert!(matches!(response.items.last(), Some(ResponseItem::Done { canceled: false })));
    }

    // Scenario S-B: one tool call, approved, then a final reply.
    #[tokio::test]
    async fn scenario_single_tool_call_then_final_reply() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "add", r#"{"a": 2, "b": 3}"#),
                text_turn("the answer is 5"),
            ]),
        });

        let add_calls = Arc::new(AtomicUsize::new(0));
        let add_calls_clone = add_calls.clone();
        let add_tool = Tool::new("add", "adds two numbers", serde_json::json!({"a": "number", "b": "number"}), move |_ctx, input| {
            add_calls_clone.fetch_add(1, Ordering::SeqCst);
            async move {
                let a = input["a"].as_f64().unwrap_or(0.0);
                let b = input["b"].as_f64().unwrap_or(0.0);
                Ok(ToolResult::ok("call_1", vec![ContentBlock::text((a + b).to_string())]))
            }
        })
        .with_annotations(crate::tools::ToolAnnotations::read_only());

        let engine = Engine::new(model, "be helpful")
            .with_tool(add_tool)
            .with_permission_engine(PermissionEngine::new(PermissionMode::BypassPermissions));
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "what is 2+3?".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(add_calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.final_message.unwrap().content[0].as_text(), Some("the answer is 5"));
    }

    // Scenario: a denying permission rule converts the tool call into an
    // error result without ever invoking the handler.
    #[tokio::test]
    async fn denied_tool_call_never_invokes_handler() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "dangerous", r#"{}"#),
                text_turn("done"),
            ]),
        });

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let dangerous = Tool::new("dangerous", "does something risky", serde_json::json!({}), move |_ctx, _input| {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ToolResult::ok("call_1", vec![])) }
        });

        let mut permission_engine = PermissionEngine::new(PermissionMode::Default);
        permission_engine.add_default_rule(crate::types::PermissionRule::deny("dangerous"));

        let engine = Engine::new(model, "be helpful")
            .with_tool(dangerous)
            .with_permission_engine(permission_engine);
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "do the risky thing".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 0);
    }

    // Scenario S-F: iteration cap halts an infinitely tool-calling model.
    #[tokio::test]
    async fn scenario_turn_budget_caps_infinite_tool_loop() {
        let turns: Vec<Vec<Event>> = (0..10)
            .map(|i| tool_call_turn(&format!("call_{i}"), "noop", "{}"))
            .collect();
        let model = Arc::new(ScriptedModel { turns: Mutex::new(turns) });

        let noop = Tool::new("noop", "does nothing", serde_json::json!({}), |_ctx, _input| async move {
            Ok(ToolResult::ok("x", vec![]))
        })
        .with_annotations(crate::tools::ToolAnnotations::read_only());

        let engine = Engine::new(model, "be helpful")
            .with_tool(noop)
            .with_permission_engine(PermissionEngine::new(PermissionMode::BypassPermissions))
            .with_max_turns(3);
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "loop forever".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert!(!response.canceled);
        let snapshot = thread.snapshot().await;
        assert!(snapshot.iter().any(|m| m.role == MessageRole::System
            && m.content[0].as_text().unwrap_or("").contains("turn budget")));
    }

    // Scenario: cancellation observed before the first model call.
    #[tokio::test]
    async fn pre_canceled_turn_emits_done_with_canceled_true() {
        let model = Arc::new(ScriptedModel { turns: Mutex::new(vec![text_turn("should not run")]) });
        let engine = Engine::new(model, "be helpful");
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");
        let cancel = Arc::new(AtomicBool::new(true));

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "hi".to_string(), ..Default::default() },
                cancel,
            )
            .await
            .unwrap();

        assert!(response.canceled);
        assert!(matches!(response.items.last(), Some(ResponseItem::Done { canceled: true })));
    }

    // §6.4: a per-call permission_mode_override takes effect for that call
    // without mutating the engine's own configured mode.
    #[tokio::test]
    async fn permission_mode_override_bypasses_a_denying_default_rule_for_one_call() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "dangerous", r#"{}"#),
                text_turn("done"),
            ]),
        });

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let dangerous = Tool::new("dangerous", "does something risky", serde_json::json!({}), move |_ctx, _input| {
            invoked_clone.fetch_add(1, Ordering::SeqCst);
            async move { Ok(ToolResult::ok("call_1", vec![])) }
        });

        let mut permission_engine = PermissionEngine::new(PermissionMode::Default);
        permission_engine.add_default_rule(crate::types::PermissionRule::deny("dangerous"));

        let engine = Engine::new(model, "be helpful")
            .with_tool(dangerous)
            .with_permission_engine(permission_engine);
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        engine
            .create_response(
                &thread,
                CreateResponseOptions {
                    input: "do the risky thing".to_string(),
                    permission_mode_override: Some(PermissionMode::BypassPermissions),
                    ..Default::default()
                },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(engine.permission_engine.mode(), PermissionMode::Default);
    }

    // §4.5/§6.3: an `ask_user` call with no `options` routes to
    // `Interactor::input` and the model sees the typed answer back.
    #[tokio::test]
    async fn ask_user_without_options_routes_to_interactor_input() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "ask_user", r#"{"title": "what is your name?"}"#),
                text_turn("nice to meet you"),
            ]),
        });

        let interactor = Interactor::new(
            |_| Box::pin(async { true }),
            |_| Box::pin(async { None }),
            |_| Box::pin(async { Vec::new() }),
            |_| Box::pin(async { Some("Ada".to_string()) }),
        );

        let engine = Engine::new(model, "be helpful")
            .with_interactor(interactor)
            .with_permission_engine(PermissionEngine::new(PermissionMode::BypassPermissions));
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "greet the user".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(response.final_message.unwrap().content[0].as_text(), Some("nice to meet you"));
        let snapshot = thread.snapshot().await;
        let tool_result = snapshot
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|b| match b {
                ContentBlock::ToolResult(r) => Some(r),
                _ => None,
            })
            .expect("a tool result was recorded");
        assert!(!tool_result.is_error);
        assert_eq!(tool_result.content[0].as_text(), Some("Ada"));
    }

    // §4.5/§6.3: an `ask_user` call with `options` routes to
    // `Interactor::select` and returns the chosen option's value.
    #[tokio::test]
    async fn ask_user_with_options_routes_to_interactor_select() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn(
                    "call_1",
                    "ask_user",
                    r#"{"title": "pick a color", "options": [{"label": "red", "value": "r"}, {"label": "blue", "value": "b"}]}"#,
                ),
                text_turn("got it"),
            ]),
        });

        let interactor = Interactor::new(
            |_| Box::pin(async { true }),
            |_| Box::pin(async { Some(1usize) }),
            |_| Box::pin(async { Vec::new() }),
            |_| Box::pin(async { None }),
        );

        let engine = Engine::new(model, "be helpful")
            .with_interactor(interactor)
            .with_permission_engine(PermissionEngine::new(PermissionMode::BypassPermissions));
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "ask for a color".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        let snapshot = thread.snapshot().await;
        let tool_result = snapshot
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|b| match b {
                ContentBlock::ToolResult(r) => Some(r),
                _ => None,
            })
            .expect("a tool result was recorded");
        assert!(!tool_result.is_error);
        assert_eq!(tool_result.content[0].as_text(), Some("b"));
    }

    // A caller-registered tool named `ask_user` overrides the built-in
    // gateway and goes through normal permission evaluation + dispatch.
    #[tokio::test]
    async fn caller_registered_ask_user_tool_overrides_the_builtin_gateway() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "ask_user", r#"{"title": "ignored"}"#),
                text_turn("done"),
            ]),
        });

        let invoked = Arc::new(AtomicUsize::new(0));
        let invoked_clone = invoked.clone();
        let custom_ask_user = Tool::new(
            "ask_user",
            "a caller-provided override",
            serde_json::json!({}),
            move |_ctx, _input| {
                invoked_clone.fetch_add(1, Ordering::SeqCst);
                async move { Ok(ToolResult::ok("call_1", vec![ContentBlock::text("custom")])) }
            },
        )
        .with_annotations(crate::tools::ToolAnnotations::read_only());

        let engine = Engine::new(model, "be helpful")
            .with_tool(custom_ask_user)
            .with_permission_engine(PermissionEngine::new(PermissionMode::BypassPermissions));
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "hi".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    // Spec §4.8 / testable property #7: every `ToolCall` is immediately
    // followed by its own `ToolCallResult`, in tool_use emit order, even
    // when that tool was denied rather than dispatched.
    #[tokio::test]
    async fn denied_tool_call_still_emits_an_interleaved_tool_call_result() {
        let model = Arc::new(ScriptedModel {
            turns: Mutex::new(vec![
                tool_call_turn("call_1", "dangerous", r#"{}"#),
                text_turn("done"),
            ]),
        });

        let dangerous = Tool::new("dangerous", "does something risky", serde_json::json!({}), |_ctx, _input| async move {
            Ok(ToolResult::ok("call_1", vec![]))
        });

        let mut permission_engine = PermissionEngine::new(PermissionMode::Default);
        permission_engine.add_default_rule(crate::types::PermissionRule::deny("dangerous"));

        let engine = Engine::new(model, "be helpful")
            .with_tool(dangerous)
            .with_permission_engine(permission_engine);
        let store = ThreadStore::new();
        let thread = store.get_or_create("main");

        let response = engine
            .create_response(
                &thread,
                CreateResponseOptions { input: "do the risky thing".to_string(), ..Default::default() },
                Arc::new(AtomicBool::new(false)),
            )
            .await
            .unwrap();

        let call_index = response
            .items
            .iter()
            .position(|item| matches!(item, ResponseItem::ToolCall { id, .. } if id == "call_1"))
            .expect("tool call was emitted");
        match &response.items[call_index + 1] {
            ResponseItem::ToolCallResult { id, is_error, .. } => {
                assert_eq!(id, "call_1");
                assert!(is_error);
            }
            other => panic!("expected ToolCallResult immediately after ToolCall, got {other:?}"),
        }
    }
}
