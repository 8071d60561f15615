use crate::config::LlmConfig;
use crate::error::{CoreError, GenerationFailure, Result};
use crate::execution_loop::error_classifier::ErrorClassifier;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info};

lazy_static! {
    static ref FENCED: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").expect("valid fence pattern");
    static ref SELECT_START: Regex = Regex::new(r"(?i)\bselect\b").expect("valid select pattern");
    static ref CTE_START: Regex =
        Regex::new(r#"(?i)\bwith\s+(recursive\s+)?[A-Za-z_"`\[][\w"`\]]*\s*(\([^)]*\))?\s+as\s*\("#).expect("valid cte pattern");
    static ref STATEMENT_LEAD: Regex = Regex::new(
        r"(?i)^\s*(select|with|insert|update|delete|drop|create|alter|replace|pragma|attach|detach|vacuum|begin|commit|values)\b"
    )
    .expect("valid statement pattern");
    static ref CLAUSE_LEAD: Regex = Regex::new(
        r"(?i)^\s*(?:(?:from|where|group|order|having|limit|offset|join|left|right|inner|cross|union|and|or|on|as|case|when|then|else|end)\b|[()])"
    )
    .expect("valid clause pattern");
}

/// A single-turn chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
}

/// External language model. Implementations report typed failures and never
/// retry on their own.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &ChatPrompt) -> std::result::Result<String, GenerationFailure>;
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| CoreError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &ChatPrompt) -> std::result::Result<String, GenerationFailure> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| GenerationFailure::Unavailable("no API key configured".to_string()))?;

        let classifier = ErrorClassifier::new();
        let budget = Duration::from_millis(self.config.timeout_ms);
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        info!("Calling model '{}' for SQL generation", self.config.model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classifier.classify_transport(&e, budget))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classifier.classify_status(status, &text, budget));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Unparseable(format!("Failed to parse model response: {}", e)))?;

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GenerationFailure::Unparseable("No content in model response".to_string()))?;

        debug!("Model returned {} chars", content.len());
        Ok(content.to_string())
    }
}

/// Pull the SQL out of a model reply: fences, leading prose and trailing prose
/// are dropped. Additional statements are kept so the validator can see them.
pub fn extract_sql(raw: &str) -> Option<String> {
    let body = match FENCED.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()).to_string(),
        None => raw.replace("```", ""),
    };

    let select_at = SELECT_START.find(&body).map(|m| m.start());
    let cte_at = CTE_START.find(&body).map(|m| m.start());
    let start = match (cte_at, select_at) {
        (Some(cte), Some(select)) if cte < select => cte,
        (_, Some(select)) => select,
        (Some(cte), None) => cte,
        (None, None) => return None,
    };

    let sql = cut_trailing_prose(&body[start..]);
    let statements: Vec<&str> = split_statements(sql)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take_while(|s| STATEMENT_LEAD.is_match(s))
        .collect();

    if statements.is_empty() {
        None
    } else {
        Some(statements.join(";\n"))
    }
}

fn cut_trailing_prose(sql: &str) -> &str {
    let mut offset = 0;
    while let Some(idx) = sql[offset..].find("\n\n") {
        let at = offset + idx;
        let rest = sql[at..].trim_start();
        if rest.is_empty() {
            return &sql[..at];
        }
        if !(STATEMENT_LEAD.is_match(rest) || CLAUSE_LEAD.is_match(rest)) {
            return &sql[..at];
        }
        offset = at + 2;
    }
    sql
}

/// Split on `;` outside quotes.
fn split_statements(sql: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut begin = 0;
    for (idx, c) in sql.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') | (None, '`') => quote = Some(c),
            (None, ';') => {
                parts.push(&sql[begin..idx]);
                begin = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&sql[begin..]);
    parts
}
