//! Pattern-matched allow/ask/deny rule evaluation with mode overrides (§4.4).
//!
//! Rules are evaluated in order; first match wins. This reuses the teacher
//! SDK's `hooks.rs` idiom of an ordered `Vec` consulted until something
//! decisive is found, but the decision itself is a pure function rather than
//! an async callback — only an `ask` effect reaches into the interactor.

use crate::tools::ToolAnnotations;
use crate::types::{PermissionEffect, PermissionMode, PermissionRule};
use serde_json::Value;

/// The outcome of evaluating a tool call against the current rules/mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Ask,
    Deny { reason: String },
}

/// Holds the active mode and an ordered rule list (settings rules prepended
/// to defaults, per §4.4).
#[derive(Clone)]
pub struct PermissionEngine {
    mode: PermissionMode,
    rules: Vec<PermissionRule>,
}

impl PermissionEngine {
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            mode,
            rules: Vec::new(),
        }
    }

    /// Prepends workspace-loaded rules so they take precedence over the
    /// engine's built-in defaults.
    pub fn with_settings_rules(mut self, mut settings_rules: Vec<PermissionRule>) -> Self {
        settings_rules.append(&mut self.rules);
        self.rules = settings_rules;
        self
    }

    pub fn add_default_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    pub fn set_mode(&mut self, mode: PermissionMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Pure decision function: no interactor calls happen here, even for
    /// `Ask` — the caller is responsible for invoking the interactor only
    /// when this returns `Decision::Ask` (testable property #4).
    pub fn evaluate(&self, tool_name: &str, input: &Value, annotations: ToolAnnotations) -> Decision {
        match self.mode {
            PermissionMode::BypassPermissions => return Decision::Allow,
            PermissionMode::Plan => {
                if !annotations.read_only {
                    return Decision::Deny {
                        reason: format!("plan mode denies mutating tool '{tool_name}'"),
                    };
                }
            }
            PermissionMode::AcceptEdits if annotations.read_only => return Decision::Allow,
            _ => {}
        }

        for rule in &self.rules {
            if rule.tool_name != tool_name {
                continue;
            }
            if let (Some(field), Some(prefix)) = (&rule.input_field, &rule.input_prefix) {
                let matches = input
                    .get(field)
                    .and_then(Value::as_str)
                    .map(|v| v.starts_with(prefix.as_str()))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            return match rule.effect {
                PermissionEffect::Allow => Decision::Allow,
                PermissionEffect::Ask => Decision::Ask,
                PermissionEffect::Deny => Decision::Deny {
                    reason: rule
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("permission denied for '{tool_name}'")),
                },
            };
        }

        match self.mode {
            PermissionMode::Default => Decision::Ask,
            PermissionMode::AcceptEdits => Decision::Ask,
            PermissionMode::BypassPermissions | PermissionMode::Plan => Decision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let mut engine = PermissionEngine::new(PermissionMode::Default);
        engine.add_default_rule(PermissionRule::allow("read_file"));
        engine.add_default_rule(PermissionRule::deny("read_file"));
        let decision = engine.evaluate("read_file", &serde_json::json!({}), ToolAnnotations::default());
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn input_prefix_must_match_to_apply_rule() {
        let mut engine = PermissionEngine::new(PermissionMode::Default);
        engine.add_default_rule(
            PermissionRule::deny("bash").with_input_prefix("command", "rm "),
        );
        engine.add_default_rule(PermissionRule::allow("bash"));

        let safe = engine.evaluate(
            "bash",
            &serde_json::json!({"command": "git status"}),
            ToolAnnotations::default(),
        );
        assert_eq!(safe, Decision::Allow);

        let dangerous = engine.evaluate(
            "bash",
            &serde_json::json!({"command": "rm -rf /"}),
            ToolAnnotations::default(),
        );
        assert!(matches!(dangerous, Decision::Deny { .. }));
    }

    #[test]
    fn bypass_mode_allows_everything_with_no_rules_consulted() {
        let mut engine = PermissionEngine::new(PermissionMode::BypassPermissions);
        engine.add_default_rule(PermissionRule::deny("bash"));
        let decision = engine.evaluate("bash", &serde_json::json!({}), ToolAnnotations::default());
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn plan_mode_denies_mutating_tools_but_allows_read_only() {
        let engine = PermissionEngine::new(PermissionMode::Plan);
        let mutating = engine.evaluate("write_file", &serde_json::json!({}), ToolAnnotations::default());
        assert!(matches!(mutating, Decision::Deny { .. }));

        let reading = engine.evaluate("read_file", &serde_json::json!({}), ToolAnnotations::read_only());
        assert_eq!(reading, Decision::Allow);
    }

    #[test]
    fn accept_edits_auto_allows_read_only_tools() {
        let engine = PermissionEngine::new(PermissionMode::AcceptEdits);
        let decision = engine.evaluate("read_file", &serde_json::json!({}), ToolAnnotations::read_only());
        assert_eq!(decision, Decision::Allow);
    }

    #[test]
    fn default_mode_with_no_matching_rule_asks() {
        let engine = PermissionEngine::new(PermissionMode::Default);
        let decision = engine.evaluate("unknown_tool", &serde_json::json!({}), ToolAnnotations::default());
        assert_eq!(decision, Decision::Ask);
    }

    #[test]
    fn settings_rules_take_precedence_over_defaults() {
        let mut engine = PermissionEngine::new(PermissionMode::Default);
        engine.add_default_rule(PermissionRule::deny("bash"));
        let engine = engine.with_settings_rules(vec![PermissionRule::allow("bash")]);
        let decision = engine.evaluate("bash", &serde_json::json!({}), ToolAnnotations::default());
        assert_eq!(decision, Decision::Allow);
    }
}
