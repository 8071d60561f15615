//! Orchestrator
//!
//! Drives one question through an ordered generator chain. Every candidate is
//! validated before it may run; the first valid one is executed.
//!
//! ```text
//! START -> LLM_ATTEMPT -> VALIDATE_LLM -> EXECUTE -> DONE | ERROR
//!              |               |
//!              +-> LLM_FAILED <+
//!                      |
//!                      v
//!               RULE_FALLBACK -> VALIDATE_RULE -> EXECUTE
//!                                      |
//!                                      v
//!                               RULE_REJECTED -> UNIVERSAL_FALLBACK -> EXECUTE | ERROR
//! ```
//!
//! The LLM is called at most once. Execution failures are reported, not
//! retried on another path.

use crate::candidate::{Confidence, SqlCandidate, SqlOrigin};
use crate::config::EngineConfig;
use crate::dataset::quote_ident;
use crate::error::{AnswerError, GenerationFailure, Result, ValidationRejection};
use crate::execution::{QueryExecutor, QueryResult};
use crate::generator::{GenerationRequest, LlmSqlGenerator, RuleBasedGenerator, SqlGenerator};
use crate::llm::LlmClient;
use crate::schema::Schema;
use crate::schema_rag::SchemaProfileRetriever;
use crate::session::{SessionContext, SessionStore, Turn};
use crate::validator::{RejectedCandidate, SqlValidator, ValidatedQuery};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const UNIVERSAL_TEMPLATE: &str = "universal_fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Start,
    LlmAttempt,
    ValidateLlm,
    LlmFailed,
    RuleFallback,
    ValidateRule,
    RuleRejected,
    UniversalFallback,
    Execute,
    Done,
    Error,
}

/// Why the LLM path did not produce the final SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    Generation(GenerationFailure),
    Rejected(ValidationRejection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FallbackDecision {
    pub llm_attempted: bool,
    pub llm_failure: Option<FailureCause>,
    pub rule_based_used: bool,
    pub rule_rejection: Option<ValidationRejection>,
    pub universal_fallback_used: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Provenance {
    /// Generator behind the SQL that was executed, if any got that far
    pub path: Option<SqlOrigin>,
    pub states: Vec<Stage>,
    pub fallback: FallbackDecision,
    /// Question intent was not resolved; downstream stages should say so
    pub low_confidence: bool,
    pub sql: Option<String>,
    pub template: Option<String>,
}

impl Provenance {
    fn enter(&mut self, stage: Stage) {
        debug!("Orchestrator -> {:?}", stage);
        self.states.push(stage);
    }

    fn select(&mut self, query: &ValidatedQuery) {
        let candidate = query.candidate();
        self.path = Some(candidate.origin);
        self.low_confidence = candidate.is_low_confidence();
        self.sql = Some(candidate.sql.clone());
        self.template = candidate.template.clone();
    }

    pub fn last_stage(&self) -> Option<Stage> {
        self.states.last().copied()
    }
}

/// Outcome of one question. Failures travel in `outcome`, never as faults.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub outcome: std::result::Result<QueryResult, AnswerError>,
    pub provenance: Provenance,
}

impl Answer {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&QueryResult> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AnswerError> {
        self.outcome.as_ref().err()
    }
}

pub struct Orchestrator {
    generators: Vec<Arc<dyn SqlGenerator>>,
    validator: SqlValidator,
    executor: QueryExecutor,
    history_turns: usize,
}

impl Orchestrator {
    /// Rule-based chain only; add a model with `with_llm`.
    pub fn new(validator: SqlValidator, executor: QueryExecutor) -> Self {
        Self {
            generators: vec![Arc::new(RuleBasedGenerator::default())],
            validator,
            executor,
            history_turns: 1,
        }
    }

    /// Chain from config: the OpenAI-compatible client goes first when a key
    /// is configured.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let orchestrator = Self::new(
            SqlValidator::new(config.table_name.clone(), config.row_cap),
            QueryExecutor::new(config.exec_timeout()),
        )
        .with_history_turns(config.history_turns);

        if !config.llm_enabled() {
            info!("No LLM API key configured, using rule-based generation only");
            return Ok(orchestrator);
        }

        let client = LlmClient::new(config.llm.clone())?;
        info!("LLM generation enabled with model '{}'", client.model());
        let generator = LlmSqlGenerator::from_config(Arc::new(client), config)
            .with_context_provider(Arc::new(SchemaProfileRetriever::default()));
        Ok(orchestrator.with_llm(Arc::new(generator)))
    }

    /// Put `generator` at the head of the chain.
    pub fn with_llm(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generators.insert(0, generator);
        self
    }

    /// Replace the whole chain, in attempt order.
    pub fn with_generators(mut self, generators: Vec<Arc<dyn SqlGenerator>>) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Answer against a stored session and record the turn on success.
    pub async fn answer_for(&self, store: &SessionStore, dataset_id: Uuid, question: &str) -> Answer {
        let ctx = match store.context(dataset_id, self.history_turns) {
            Some(ctx) => ctx,
            None => {
                warn!("Question for unknown dataset {}", dataset_id);
                let mut provenance = Provenance::default();
                provenance.enter(Stage::Start);
                provenance.enter(Stage::Error);
                return Answer {
                    outcome: Err(AnswerError::UnknownDataset {
                        dataset_id: dataset_id.to_string(),
                    }),
                    provenance,
                };
            }
        };

        let answer = self.answer(&ctx, question).await;
        if let Ok(ref result) = answer.outcome {
            store.record_turn(
                &ctx,
                Turn {
                    question: question.to_string(),
                    sql: result.sql().to_string(),
                    columns: result.columns.clone(),
                    origin: result.candidate.origin,
                },
            );
        }
        answer
    }

    /// Answer against an explicit session snapshot.
    pub async fn answer(&self, ctx: &SessionContext, question: &str) -> Answer {
        let schema = ctx.dataset.schema();
        let request = GenerationRequest::new(question, schema).with_history(&ctx.history);
        let mut provenance = Provenance::default();
        provenance.enter(Stage::Start);
        info!("Answering question for dataset {}: {}", ctx.dataset_id, question);

        let mut chosen = None;
        for generator in &self.generators {
            let origin = generator.origin();
            match origin {
                SqlOrigin::Llm => {
                    provenance.enter(Stage::LlmAttempt);
                    provenance.fallback.llm_attempted = true;
                }
                SqlOrigin::RuleBased => {
                    provenance.enter(Stage::RuleFallback);
                    provenance.fallback.rule_based_used = true;
                }
            }

            let candidate = match generator.generate(&request).await {
                Ok(candidate) => candidate,
                Err(failure) => {
                    warn!("{} generation failed: {}", origin, failure);
                    record_failure(&mut provenance, origin, FailureCause::Generation(failure));
                    continue;
                }
            };

            provenance.enter(match origin {
                SqlOrigin::Llm => Stage::ValidateLlm,
                SqlOrigin::RuleBased => Stage::ValidateRule,
            });
            match self.validator.validate(candidate, schema) {
                Ok(validated) => {
                    chosen = Some(validated);
                    break;
                }
                Err(RejectedCandidate { reason, .. }) => {
                    record_failure(&mut provenance, origin, FailureCause::Rejected(reason));
                }
            }
        }

        let validated = match chosen {
            Some(validated) => validated,
            None => match self.universal_fallback(schema, &mut provenance) {
                Ok(validated) => validated,
                Err(rejection) => {
                    provenance.enter(Stage::Error);
                    return Answer {
                        outcome: Err(AnswerError::NoValidCandidate { rejection }),
                        provenance,
                    };
                }
            },
        };

        provenance.select(&validated);
        provenance.enter(Stage::Execute);
        debug!("Executing with a {:?} budget: {}", self.executor.timeout(), validated.sql());
        let outcome = self
            .executor
            .execute(Arc::clone(&ctx.dataset), validated)
            .await
            .map_err(|failure| AnswerError::Execution { failure });

        match outcome {
            Ok(ref result) => {
                provenance.enter(Stage::Done);
                info!(
                    "Answered via {} path with {} rows",
                    result.candidate.origin, result.row_count
                );
            }
            Err(ref e) => {
                provenance.enter(Stage::Error);
                warn!("Execution failed: {}", e);
            }
        }
        Answer { outcome, provenance }
    }

    fn universal_fallback(
        &self,
        schema: &Schema,
        provenance: &mut Provenance,
    ) -> std::result::Result<ValidatedQuery, ValidationRejection> {
        provenance.enter(Stage::UniversalFallback);
        provenance.fallback.universal_fallback_used = true;
        warn!("No generator produced a valid candidate, using the trivial query");

        let candidate = SqlCandidate::rule_based(
            format!(
                "SELECT * FROM {} LIMIT {}",
                quote_ident(schema.table()),
                self.validator.row_cap()
            ),
            UNIVERSAL_TEMPLATE,
            Confidence::Low,
        );
        self.validator
            .validate(candidate, schema)
            .map_err(|rejected| rejected.reason)
    }
}

fn record_failure(provenance: &mut Provenance, origin: SqlOrigin, cause: FailureCause) {
    match origin {
        SqlOrigin::Llm => {
            provenance.enter(Stage::LlmFailed);
            provenance.fallback.llm_failure = Some(cause);
        }
        SqlOrigin::RuleBased => {
            provenance.enter(Stage::RuleRejected);
            if let FailureCause::Rejected(reason) = cause {
                provenance.fallback.rule_rejection = Some(reason);
            }
        }
    }
}
