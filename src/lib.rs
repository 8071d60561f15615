//! Natural-language-to-SQL core
//!
//! A question and an uploaded table go in; a validated, executed SQL result
//! and its provenance come out. Generation tries the LLM first and falls back
//! to deterministic templates, and nothing runs without passing the validator.

pub mod candidate;
pub mod config;
pub mod dataset;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod fuzzy_matcher;
pub mod generator;
pub mod llm;
pub mod schema;
pub mod schema_rag;
pub mod session;
pub mod validator;

pub use candidate::{Confidence, Correction, SqlCandidate, SqlOrigin, ValidationStatus};
pub use config::{EngineConfig, LlmConfig};
pub use dataset::{Dataset, RawTable};
pub use error::{
    AnswerError, CoreError, ExecutionFailure, GenerationFailure, Result, SchemaInferenceError,
    ValidationRejection,
};
pub use execution::{QueryExecutor, QueryResult};
pub use execution_loop::{Answer, FailureCause, FallbackDecision, Orchestrator, Provenance, Stage};
pub use generator::{GenerationRequest, LlmSqlGenerator, RuleBasedGenerator, SqlGenerator};
pub use llm::{ChatModel, ChatPrompt, LlmClient};
pub use schema::{ColumnSchema, ColumnType, Schema, SchemaInference};
pub use schema_rag::{ContextProvider, SchemaProfileRetriever};
pub use session::{SessionContext, SessionStore, Turn};
pub use validator::{IdentifierIssue, SqlValidator, ValidatedQuery};
