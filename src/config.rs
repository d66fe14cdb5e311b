//! Engine configuration surface (§6.4).
//!
//! Loading configuration from files or the CLI is explicitly out of scope
//! (§ Non-goals); this module only gives the embedding application a typed,
//! validated builder to populate itself. Trimmed down from the teacher
//! SDK's `config.rs`, which additionally resolved provider defaults and
//! environment variables — that resolution layer has no counterpart here.

use crate::compactor::CompactionConfig;
use crate::retry::RetryConfig;
use crate::types::{BaseUrl, ModelName, PermissionMode, PermissionRule, Temperature};
use crate::{Error, Result};

/// Static permission posture for an engine instance.
#[derive(Debug, Clone, Default)]
pub struct PermissionConfig {
    pub mode: PermissionMode,
    pub rules: Vec<PermissionRule>,
}

/// Everything the Agent Response Engine needs to run a turn.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model_name: ModelName,
    pub base_url: BaseUrl,
    pub api_key: Option<String>,
    pub temperature: Temperature,
    pub max_tokens: u32,
    pub max_turns: u32,
    pub max_parallel_tool_calls: usize,
    pub compaction: CompactionConfig,
    pub permissions: PermissionConfig,
    pub retry: RetryConfig,
}

/// Builder for [`EngineConfig`], validating required fields at `build()`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    model_name: Option<String>,
    base_url: Option<String>,
    api_key: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    max_turns: Option<u32>,
    max_parallel_tool_calls: Option<usize>,
    compaction: CompactionConfig,
    permissions: PermissionConfig,
    retry: RetryConfig,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl EngineConfigBuilder {
    pub fn model(mut self, name: impl Into<String>) -> Self {
        self.model_name = Some(name.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Caps the S0-S5 state machine's turn budget (§4.8, default 25).
    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Caps concurrent tool dispatch for reentrant tools (§5, default 8).
    pub fn max_parallel_tool_calls(mut self, max: usize) -> Self {
        self.max_parallel_tool_calls = Some(max);
        self
    }

    pub fn compaction(mut self, compaction: CompactionConfig) -> Self {
        self.compaction = compaction;
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permissions.mode = mode;
        self
    }

    pub fn permission_rule(mut self, rule: PermissionRule) -> Self {
        self.permissions.rules.push(rule);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn build(self) -> Result<EngineConfig> {
        let model_name = self
            .model_name
            .ok_or_else(|| Error::config("model name is required"))?;
        let base_url = self
            .base_url
            .ok_or_else(|| Error::config("base_url is required"))?;

        Ok(EngineConfig {
            model_name: ModelName::new(model_name)?,
            base_url: BaseUrl::new(base_url)?,
            api_key: self.api_key,
            temperature: Temperature::new(self.temperature.unwrap_or(1.0))?,
            max_tokens: self.max_tokens.unwrap_or(4096),
            max_turns: self.max_turns.unwrap_or(25),
            max_parallel_tool_calls: self.max_parallel_tool_calls.unwrap_or(8),
            compaction: self.compaction,
            permissions: self.permissions,
            retry: self.retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_model_and_base_url() {
        let error = EngineConfig::builder().build().unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[test]
    fn builder_applies_defaults() {
        let config = EngineConfig::builder()
            .model("gpt-4o-mini")
            .base_url("https://api.example.com/v1")
            .build()
            .unwrap();

        assert_eq!(config.max_turns, 25);
        assert_eq!(config.max_parallel_tool_calls, 8);
        assert_eq!(config.temperature.value(), 1.0);
    }

    #[test]
    fn builder_rejects_invalid_temperature() {
        let error = EngineConfig::builder()
            .model("gpt-4o-mini")
            .base_url("https://api.example.com/v1")
            .temperature(5.0)
            .build()
            .unwrap_err();
        assert!(matches!(error, Error::InvalidInput(_)));
    }

    #[test]
    fn permission_rules_accumulate_in_order() {
        let config = EngineConfig::builder()
            .model("gpt-4o-mini")
            .base_url("https://api.example.com/v1")
            .permission_mode(PermissionMode::AcceptEdits)
            .permission_rule(PermissionRule::allow("read_file"))
            .permission_rule(PermissionRule::deny("bash"))
            .build()
            .unwrap();

        assert_eq!(config.permissions.mode, PermissionMode::AcceptEdits);
        assert_eq!(config.permissions.rules.len(), 2);
    }
}
