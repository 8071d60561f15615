//! SQL generators
//!
//! Both generators turn a question plus schema into one `SqlCandidate`. The
//! orchestrator owns the order they are tried in; a generator never calls
//! another one.

pub mod llm_backed;
pub mod rule_based;

pub use llm_backed::*;
pub use rule_based::*;

use crate::candidate::{SqlCandidate, SqlOrigin};
use crate::error::GenerationFailure;
use crate::schema::Schema;
use crate::session::Turn;
use async_trait::async_trait;

/// Everything a generator may look at for one question.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub question: &'a str,
    pub schema: &'a Schema,
    /// Most recent turns, oldest first
    pub history: &'a [Turn],
}

impl<'a> GenerationRequest<'a> {
    pub fn new(question: &'a str, schema: &'a Schema) -> Self {
        Self {
            question,
            schema,
            history: &[],
        }
    }

    pub fn with_history(mut self, history: &'a [Turn]) -> Self {
        self.history = history;
        self
    }
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    fn origin(&self) -> SqlOrigin;

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<SqlCandidate, GenerationFailure>;
}
