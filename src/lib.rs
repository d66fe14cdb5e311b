//! # Dive Agent Engine
//!
//! A streaming, tool-using, multi-turn agent runtime: repeatedly send the
//! accumulated conversation to a model, incrementally assemble the streamed
//! reply, dispatch any tool calls it emits (with permission gating and user
//! confirmation), append tool results, and iterate until the model declines
//! to call further tools.
//!
//! ## Modules
//!
//! - **types**: messages, content blocks, tool calls/results, usage,
//!   response items, permission rules.
//! - **error**: the `Error`/`ModelError`/`ToolError` taxonomy.
//! - **model**: the abstract `Model` trait plus an OpenAI-compatible
//!   streaming adapter.
//! - **accumulator**: assembles streamed events into a sealed message.
//! - **tools**: tool definitions, the builder DSL, and the cancellation-
//!   aware `TurnContext`.
//! - **permission**: allow/ask/deny rule evaluation and permission modes.
//! - **interactor**: the user confirmation/selection/input gateway.
//! - **thread**: the in-memory thread registry and per-thread message log.
//! - **compactor**: token-threshold-triggered history summarization.
//! - **engine**: the `S0`-`S5` turn state machine tying everything together.
//! - **retry**: exponential backoff for retryable model failures.
//! - **config**: the `EngineConfig` builder.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dive_agent_engine::prelude::*;
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//!
//! # async fn example() -> Result<()> {
//! let model = Arc::new(OpenAiCompatibleModel::new(
//!     "http://localhost:1234/v1",
//!     "qwen2.5-32b-instruct",
//! ));
//!
//! let engine = Engine::new(model, "You are a helpful assistant");
//! let threads = ThreadStore::new();
//! let thread = threads.get_or_create("main");
//!
//! let response = engine
//!     .create_response(
//!         &thread,
//!         CreateResponseOptions { input: "What's 2+2?".to_string(), ..Default::default() },
//!         Arc::new(AtomicBool::new(false)),
//!     )
//!     .await?;
//! println!("{:?}", response.final_message);
//! # Ok(())
//! # }
//! ```

/// Engine configuration surface: builds an `EngineConfig` from required
/// model/base-url fields plus optional compaction/permission/retry knobs.
/// Loading from files or the CLI is out of scope.
pub mod config;

/// Context Compactor: summarizes the oldest portion of a thread once usage
/// crosses a token threshold, via an LLM-driven summarization call.
pub mod compactor;

/// Error types and conversions: `Error` (caller-surfaced), `ModelError`
/// (retry classification), `ToolError` (absorbed into tool results).
mod error;

/// The Agent Response Engine: the `S0`-`S5` turn state machine.
pub mod engine;

/// User Interactor: the confirm/select/multi_select/input gateway the
/// permission engine's `ask` effect calls into.
pub mod interactor;

/// Abstract model contract plus an OpenAI-compatible streaming adapter.
pub mod model;

/// Stream Accumulator: assembles streamed model events into sealed
/// messages, one content block at a time.
mod accumulator;

/// Permission Engine: pattern-matched allow/ask/deny rule evaluation with
/// mode overrides (`default`/`accept_edits`/`bypass_permissions`/`plan`).
pub mod permission;

/// Retry policy for model calls: exponential backoff with jitter,
/// classified on `ModelError`.
pub mod retry;

/// Thread & Context Manager: the in-memory thread registry.
pub mod thread;

/// Tool definition and invocation contract, including the fluent
/// `ToolBuilder` and the cancellation-aware `TurnContext`.
pub mod tools;

/// Core data model: messages, content blocks, tool calls/results, usage,
/// response items, and permission rules.
pub mod types;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================

pub use error::{Error, ModelError, Result, ToolError};

pub use engine::{CreateResponseOptions, Engine, ModelSettings, Response, ToolChoice};

pub use model::{Event, Model, OpenAiCompatibleModel};

pub use thread::{Thread, ThreadStore};

pub use tools::{Tool, ToolBuilder, ToolAnnotations, TurnContext, tool};

pub use types::{
    ContentBlock, Message, MessageRole, PermissionEffect, PermissionMode, PermissionRule,
    ResponseItem, TextBlock, ToolResult, ToolResultBlock, ToolUseBlock, Usage,
};

pub use permission::PermissionEngine;

pub use interactor::Interactor;

pub use compactor::{CompactionConfig, CompactionPolicy, SummarizeAll};

pub use config::{EngineConfig, PermissionConfig};

/// Convenience re-export of the most commonly used types and functions.
pub mod prelude {
    pub use crate::{
        CompactionConfig, ContentBlock, CreateResponseOptions, Engine, Error, Interactor, Message,
        Model, OpenAiCompatibleModel, PermissionEngine, PermissionMode, PermissionRule, Result,
        Thread, ThreadStore, Tool, ToolResult, ToolUseBlock, tool,
    };
}
