//! Schema RAG
//!
//! Optional retrieval of question-relevant schema context for the LLM prompt.

pub mod retriever;

pub use retriever::*;

use crate::schema::Schema;

/// Supplies extra prompt context for a question. Returning `None` leaves the
/// prompt with the plain schema description.
pub trait ContextProvider: Send + Sync {
    fn retrieve(&self, question: &str, schema: &Schema) -> Option<String>;
}
