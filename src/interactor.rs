//! User interaction gateway: confirm/select/input prompts raised by the
//! permission engine's `ask` effect (§4.4, Tool Permission & Interaction
//! Gateway).
//!
//! Handlers are stored with the same `Arc<dyn Fn(...) -> Pin<Box<dyn
//! Future<...>>>>` idiom the teacher SDK uses for its hook callbacks
//! (`hooks.rs`), but the shape here is request/response rather than
//! fire-and-continue: each call returns the user's actual answer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Convention name for the engine's built-in gateway tool that routes model
/// tool calls back through `select`/`input` (§4.5, §6.3).
pub const ASK_USER_TOOL_NAME: &str = "ask_user";

/// A question posed to confirm a pending tool call.
#[derive(Debug, Clone)]
pub struct ConfirmRequest {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub reason: Option<String>,
}

/// A single-choice prompt.
#[derive(Debug, Clone)]
pub struct SelectRequest {
    pub prompt: String,
    pub options: Vec<String>,
}

/// A multi-choice prompt.
#[derive(Debug, Clone)]
pub struct MultiSelectRequest {
    pub prompt: String,
    pub options: Vec<String>,
}

/// A free-text prompt.
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub prompt: String,
    pub default: Option<String>,
}

type ConfirmHandler =
    Arc<dyn Fn(ConfirmRequest) -> Pin<Box<dyn Future<Output = bool> + Send>> + Send + Sync>;
type SelectHandler = Arc<
    dyn Fn(SelectRequest) -> Pin<Box<dyn Future<Output = Option<usize>> + Send>> + Send + Sync,
>;
type MultiSelectHandler = Arc<
    dyn Fn(MultiSelectRequest) -> Pin<Box<dyn Future<Output = Vec<usize>> + Send>> + Send + Sync,
>;
type InputHandler = Arc<
    dyn Fn(InputRequest) -> Pin<Box<dyn Future<Output = Option<String>> + Send>> + Send + Sync,
>;

/// The gateway through which the engine asks a human (or a scripted test
/// double) a question and waits for an answer.
///
/// All operations are cancellation-agnostic at this layer — the engine is
/// responsible for racing an `interactor` call against its own turn
/// cancellation signal if it wants to abandon a pending prompt.
#[derive(Clone)]
pub struct Interactor {
    confirm: ConfirmHandler,
    select: SelectHandler,
    multi_select: MultiSelectHandler,
    input: InputHandler,
}

impl Interactor {
    pub fn new(
        confirm: impl Fn(ConfirmRequest) -> Pin<Box<dyn Future<Output = bool> + Send>>
            + Send
            + Sync
            + 'static,
        select: impl Fn(SelectRequest) -> Pin<Box<dyn Future<Output = Option<usize>> + Send>>
            + Send
            + Sync
            + 'static,
        multi_select: impl Fn(MultiSelectRequest) -> Pin<Box<dyn Future<Output = Vec<usize>> + Send>>
            + Send
            + Sync
            + 'static,
        input: impl Fn(InputRequest) -> Pin<Box<dyn Future<Output = Option<String>> + Send>>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            confirm: Arc::new(confirm),
            select: Arc::new(select),
            multi_select: Arc::new(multi_select),
            input: Arc::new(input),
        }
    }

    pub async fn confirm(&self, request: ConfirmRequest) -> bool {
        (self.confirm)(request).await
    }

    pub async fn select(&self, request: SelectRequest) -> Option<usize> {
        (self.select)(request).await
    }

    pub async fn multi_select(&self, request: MultiSelectRequest) -> Vec<usize> {
        (self.multi_select)(request).await
    }

    pub async fn input(&self, request: InputRequest) -> Option<String> {
        (self.input)(request).await
    }

    /// An interactor that auto-approves confirmations, picks the first
    /// option, selects none, and returns each prompt's default. Used when an
    /// engine runs unattended (e.g. `bypass_permissions` mode, or headless
    /// batch runs that never reach `ask`).
    pub fn null() -> Self {
        Self::new(
            |_| Box::pin(async { true }),
            |req| Box::pin(async move { if req.options.is_empty() { None } else { Some(0) } }),
            |_| Box::pin(async { Vec::new() }),
            |req| Box::pin(async move { req.default }),
        )
    }
}

impl std::fmt::Debug for Interactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interactor").finish_non_exhaustive()
    }
}
