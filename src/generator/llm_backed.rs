//! LLM SQL Generator
//!
//! One model call per question, bounded by a hard timeout. The reply is
//! trimmed down to SQL and its identifiers are checked against the schema
//! before it is handed back as a candidate. Failures come back typed; this
//! generator never retries and never falls back on its own.

use crate::candidate::{SqlCandidate, SqlOrigin};
use crate::config::EngineConfig;
use crate::error::{GenerationFailure, ValidationRejection};
use crate::generator::{GenerationRequest, SqlGenerator};
use crate::llm::{extract_sql, ChatModel, ChatPrompt};
use crate::schema_rag::ContextProvider;
use crate::validator::{IdentifierIssue, SqlValidator};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "You translate questions about a single table into one SQLite SELECT statement.
Rules:
- Reply with the SQL only. No markdown, no explanation.
- Use only the table and columns listed. Quote identifiers with double quotes.
- Exactly one read-only statement.
- Dates are ISO-8601 text; bucket them with strftime.";

pub struct LlmSqlGenerator {
    model: Arc<dyn ChatModel>,
    validator: SqlValidator,
    timeout: Duration,
    context_provider: Option<Arc<dyn ContextProvider>>,
    sample_values: usize,
    context_chars: usize,
}

impl LlmSqlGenerator {
    pub fn new(model: Arc<dyn ChatModel>, validator: SqlValidator, timeout: Duration) -> Self {
        Self {
            model,
            validator,
            timeout,
            context_provider: None,
            sample_values: 3,
            context_chars: 1400,
        }
    }

    pub fn from_config(model: Arc<dyn ChatModel>, config: &EngineConfig) -> Self {
        Self::new(
            model,
            SqlValidator::new(config.table_name.clone(), config.row_cap),
            config.llm_timeout(),
        )
        .with_prompt_limits(config.llm.sample_values, config.llm.context_chars)
    }

    pub fn with_context_provider(mut self, provider: Arc<dyn ContextProvider>) -> Self {
        self.context_provider = Some(provider);
        self
    }

    pub fn with_prompt_limits(mut self, sample_values: usize, context_chars: usize) -> Self {
        self.sample_values = sample_values;
        self.context_chars = context_chars;
        self
    }

    pub fn build_prompt(&self, request: &GenerationRequest<'_>) -> ChatPrompt {
        let mut user = request.schema.describe(self.sample_values);

        if let Some(context) = self
            .context_provider
            .as_ref()
            .and_then(|p| p.retrieve(request.question, request.schema))
        {
            let context: String = context.chars().take(self.context_chars).collect();
            user.push_str("\nRelevant columns:\n");
            user.push_str(&context);
            user.push('\n');
        }

        for turn in request.history {
            user.push_str(&format!(
                "\nPrevious question: {}\nPrevious SQL: {}\n",
                turn.question, turn.sql
            ));
        }

        user.push_str(&format!("\nQuestion: {}\nSQL:", request.question));

        ChatPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }
}

#[async_trait]
impl SqlGenerator for LlmSqlGenerator {
    fn origin(&self) -> SqlOrigin {
        SqlOrigin::Llm
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<SqlCandidate, GenerationFailure> {
        let prompt = self.build_prompt(request);
        info!("Requesting SQL from model '{}'", self.model.name());

        let reply = match tokio::time::timeout(self.timeout, self.model.complete(&prompt)).await {
            Ok(reply) => reply?,
            Err(_) => {
                warn!("Model '{}' did not answer within {:?}", self.model.name(), self.timeout);
                return Err(GenerationFailure::Timeout(self.timeout.as_millis() as u64));
            }
        };

        let sql = extract_sql(&reply).ok_or_else(|| {
            let snippet: String = reply.chars().take(120).collect();
            GenerationFailure::Unparseable(format!("no SQL statement in reply: {}", snippet))
        })?;

        match self.validator.check_identifiers(&sql, request.schema) {
            Ok(()) => Ok(SqlCandidate::llm(sql)),
            Err(IdentifierIssue::Unparseable(message)) => {
                warn!("Model reply does not parse as SQL: {}", message);
                Err(GenerationFailure::Unparseable(format!("unparseable SQL: {}", message)))
            }
            Err(IdentifierIssue::Rejected(ValidationRejection::UnknownColumn(name)))
            | Err(IdentifierIssue::Rejected(ValidationRejection::UnknownTable(name))) => {
                warn!("Model referenced unknown identifier '{}'", name);
                Err(GenerationFailure::InvalidColumns(vec![name]))
            }
            // Structural problems in parsed SQL are the validator's call.
            Err(IdentifierIssue::Rejected(_)) => Ok(SqlCandidate::llm(sql)),
        }
    }
}
