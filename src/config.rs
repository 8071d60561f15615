//! Engine configuration
//!
//! Defaults are usable as-is; `from_env` layers `OPENAI_*` and `NL2SQL_*`
//! variables on top, and `load` reads a JSON file with the same shape.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the per-session table every query runs against
    pub table_name: String,

    /// Maximum rows any query may return
    pub row_cap: u64,

    /// Time budget for a single query execution
    pub exec_timeout_ms: u64,

    /// Distinct/non-null ratio at or below which a column is categorical
    pub categorical_ratio: f64,

    /// Number of previous turns handed to the LLM prompt
    pub history_turns: usize,

    pub llm: LlmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            table_name: "data".to_string(),
            row_cap: 1000,
            exec_timeout_ms: 5_000,
            categorical_ratio: 0.5,
            history_turns: 1,
            llm: LlmConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// No key means the LLM path is reported as unavailable
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Sample values per column included in the prompt
    pub sample_values: usize,
    /// Upper bound on retrieved context length, in characters
    pub context_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_ms: 20_000,
            max_tokens: 300,
            temperature: 0.1,
            sample_values: 3,
            context_chars: 1400,
        }
    }
}

impl EngineConfig {
    /// Read a JSON config file; missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.check()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Override fields from environment variables.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(rows) = env_parse::<u64>("NL2SQL_MAX_ROWS")? {
            self.row_cap = rows;
        }
        if let Some(ms) = env_parse::<u64>("NL2SQL_EXEC_TIMEOUT_MS")? {
            self.exec_timeout_ms = ms;
        }
        if let Some(ms) = env_parse::<u64>("NL2SQL_LLM_TIMEOUT_MS")? {
            self.llm.timeout_ms = ms;
        }
        self.check()?;
        Ok(self)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_millis(self.exec_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_millis(self.llm.timeout_ms)
    }

    pub fn llm_enabled(&self) -> bool {
        self.llm.api_key.as_deref().map_or(false, |k| !k.trim().is_empty())
    }

    fn check(&self) -> Result<()> {
        if self.row_cap == 0 {
            return Err(CoreError::Config("row_cap must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.categorical_ratio) {
            return Err(CoreError::Config(format!(
                "categorical_ratio must be within 0..=1, got {}",
                self.categorical_ratio
            )));
        }
        if self.table_name.trim().is_empty() {
            return Err(CoreError::Config("table_name must not be blank".to_string()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| CoreError::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.check().is_ok());
        assert_eq!(config.table_name, "data");
        assert!(!config.llm_enabled());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"row_cap": 25, "llm": {"model": "local"}}"#).unwrap();
        assert_eq!(config.row_cap, 25);
        assert_eq!(config.llm.model, "local");
        assert_eq!(config.llm.timeout_ms, 20_000);
        assert_eq!(config.table_name, "data");
    }

    #[test]
    fn test_zero_row_cap_rejected() {
        let config = EngineConfig {
            row_cap: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.check(), Err(CoreError::Config(_))));
    }
}
