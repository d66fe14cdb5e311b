//! Tool definition and invocation contract (§4.3).
//!
//! A [`Tool`] exposes name/description/schema/annotations plus an async
//! handler. Handlers are stored the way the teacher SDK stores them — an
//! `Arc<dyn Fn(...) -> Pin<Box<dyn Future<...>>> + Send + Sync>` — generalized
//! to take a [`TurnContext`] (for cancellation) and to return a
//! [`crate::types::ToolResult`] rather than a bare JSON value, so tool
//! failures become structured results instead of bare errors.

use crate::error::ToolError;
use crate::types::ToolResult;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared per-turn state threaded into every tool invocation so tools can
/// observe cancellation (spec §4.3: "tools must honor context cancellation").
#[derive(Clone)]
pub struct TurnContext {
    pub thread_id: String,
    cancel: Arc<AtomicBool>,
}

impl TurnContext {
    pub fn new(thread_id: impl Into<String>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            thread_id: thread_id.into(),
            cancel,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Declared behavioral hints a tool makes about itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolAnnotations {
    /// Auto-allowed under `accept_edits` permission mode and denied under
    /// `plan` mode's mutating-tool block.
    pub read_only: bool,
    /// If false (the default), the engine serializes calls to this tool
    /// even when dispatching the rest of a turn's tool calls concurrently.
    pub reentrant: bool,
}

impl ToolAnnotations {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            reentrant: true,
        }
    }
}

pub type ToolHandler = Arc<
    dyn Fn(TurnContext, Value) -> Pin<Box<dyn Future<Output = Result<ToolResult, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A callable tool: metadata plus a handler.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    annotations: ToolAnnotations,
    handler: ToolHandler,
}

impl Tool {
    /// Builds a tool from a simple-notation, typed, or full JSON Schema —
    /// see [`convert_schema_to_openai`] for the accepted shapes.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(TurnContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: convert_schema_to_openai(schema),
            annotations: ToolAnnotations::default(),
            handler: Arc::new(move |ctx, input| Box::pin(handler(ctx, input))),
        }
    }

    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn annotations(&self) -> ToolAnnotations {
        self.annotations
    }

    pub fn spec(&self) -> crate::model::ToolSpec {
        crate::model::ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Invokes the handler. Does not itself check cancellation before
    /// calling — tools that honor `ctx.is_canceled()` may return early; the
    /// engine additionally races dispatch against the cancellation signal.
    pub async fn call(&self, ctx: TurnContext, input: Value) -> Result<ToolResult, ToolError> {
        (self.handler)(ctx, input).await
    }
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

/// Normalizes a simple-notation, typed, or already-complete schema into a
/// JSON Schema object with `properties`/`required`.
fn convert_schema_to_openai(schema: Value) -> Value {
    let Some(obj) = schema.as_object() else {
        return serde_json::json!({"type": "object", "properties": {}, "required": []});
    };

    if obj.contains_key("type") && obj.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (param_name, param_type) in obj {
        if let Some(type_str) = param_type.as_str() {
            properties.insert(param_name.clone(), type_to_json_schema(type_str));
            required.push(param_name.clone());
        } else if param_type.is_object() {
            let mut prop = param_type.clone();
            let prop_obj = prop.as_object_mut().expect("checked is_object above");

            let is_optional = prop_obj
                .remove("optional")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let is_required = prop_obj.remove("required").and_then(|v| v.as_bool());
            let has_default = prop_obj.contains_key("default");

            properties.insert(param_name.clone(), prop);

            if is_required == Some(true) {
                required.push(param_name.clone());
            } else if is_optional || is_required == Some(false) || has_default {
                // explicitly or implicitly optional
            } else {
                required.push(param_name.clone());
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn type_to_json_schema(type_str: &str) -> Value {
    let json_type = match type_str {
        "string" | "str" => "string",
        "integer" | "int" | "i32" | "i64" | "u32" | "u64" => "integer",
        "number" | "float" | "f32" | "f64" => "number",
        "boolean" | "bool" => "boolean",
        "array" | "list" | "vec" => "array",
        "object" | "dict" | "map" => "object",
        _ => "string",
    };
    serde_json::json!({ "type": json_type })
}

/// Fluent builder, mirroring the teacher SDK's `ToolBuilder`.
pub struct ToolBuilder {
    name: String,
    description: String,
    schema: Value,
    annotations: ToolAnnotations,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: Value::Object(serde_json::Map::new()),
            annotations: ToolAnnotations::default(),
        }
    }

    /// Adds one simple-notation parameter (e.g. `.param("path", "string")`).
    pub fn param(mut self, name: impl Into<String>, type_str: impl Into<String>) -> Self {
        if let Value::Object(map) = &mut self.schema {
            map.insert(name.into(), Value::String(type_str.into()));
        }
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(TurnContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolResult, ToolError>> + Send + 'static,
    {
        Tool::new(self.name, self.description, self.schema, handler).with_annotations(self.annotations)
    }
}

/// Starts a [`ToolBuilder`].
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder::new(name, description)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> TurnContext {
        TurnContext::new("t1", Arc::new(AtomicBool::new(false)))
    }

    #[tokio::test]
    async fn builder_chain_produces_a_callable_tool() {
        let add = tool("add", "Add two numbers")
            .param("a", "number")
            .param("b", "number")
            .build(|_ctx, args| async move {
                let a = args["a"].as_f64().unwrap_or(0.0);
                let b = args["b"].as_f64().unwrap_or(0.0);
                Ok(ToolResult::ok(
                    "call",
                    vec![crate::types::ContentBlock::text((a + b).to_string())],
                ))
            });

        let result = add
            .call(test_ctx(), serde_json::json!({"a": 2.0, "b": 3.0}))
            .await
            .unwrap();
        assert!(!result.is_error);
    }

    #[test]
    fn simple_notation_marks_all_params_required() {
        let schema = convert_schema_to_openai(serde_json::json!({"location": "string"}));
        assert_eq!(schema["required"], serde_json::json!(["location"]));
        assert_eq!(schema["properties"]["location"]["type"], "string");
    }

    #[test]
    fn typed_schema_with_default_is_optional() {
        let schema = convert_schema_to_openai(serde_json::json!({
            "limit": {"type": "integer", "default": 10}
        }));
        assert_eq!(schema["required"], serde_json::json!([] as [&str; 0]));
    }

    #[test]
    fn full_json_schema_passes_through_unchanged() {
        let full = serde_json::json!({"type": "object", "properties": {"x": {"type": "string"}}});
        assert_eq!(convert_schema_to_openai(full.clone()), full);
    }

    #[test]
    fn read_only_annotation_sets_both_flags() {
        let annotations = ToolAnnotations::read_only();
        assert!(annotations.read_only);
        assert!(annotations.reentrant);
    }

    #[tokio::test]
    async fn tool_honors_cancellation_flag() {
        let cancel = Arc::new(AtomicBool::new(false));
        let echo = tool("echo", "echoes cancellation state").build({
            let cancel = cancel.clone();
            move |ctx, _args| {
                let canceled_before_call = cancel.load(Ordering::SeqCst);
                async move {
                    Ok(ToolResult::ok(
                        "call",
                        vec![crate::types::ContentBlock::text(format!(
                            "{} {}",
                            canceled_before_call,
                            ctx.is_canceled()
                        ))],
                    ))
                }
            }
        });
        cancel.store(true, Ordering::SeqCst);
        let ctx = TurnContext::new("t1", cancel);
        let result = echo.call(ctx, serde_json::json!({})).await.unwrap();
        assert_eq!(
            result.content_blocks[0].as_text(),
            Some("false true")
        );
    }
}
