//! Schema RAG Retriever
//!
//! Scores one profile chunk per column by word overlap with the question and
//! returns the best chunks. Name words weigh more than sample values.

use crate::fuzzy_matcher::ColumnMatcher;
use crate::schema::{ColumnSchema, Schema};
use crate::schema_rag::ContextProvider;
use itertools::Itertools;
use std::collections::HashSet;

const NAME_WEIGHT: usize = 2;
const VALUE_WEIGHT: usize = 1;

/// A column profile with its retrieval score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub column: String,
    pub text: String,
    pub score: usize,
}

/// Column-profile retriever
pub struct SchemaProfileRetriever {
    matcher: ColumnMatcher,
    max_chunks: usize,
}

impl Default for SchemaProfileRetriever {
    fn default() -> Self {
        Self::new(4)
    }
}

impl SchemaProfileRetriever {
    pub fn new(max_chunks: usize) -> Self {
        Self {
            matcher: ColumnMatcher::default(),
            max_chunks,
        }
    }

    pub fn rank(&self, question: &str, schema: &Schema) -> Vec<RetrievedChunk> {
        let question_words: HashSet<String> = self
            .matcher
            .normalize(question)
            .split(' ')
            .filter(|w| w.len() > 1)
            .map(str::to_string)
            .collect();

        let chunks: Vec<(usize, RetrievedChunk)> = schema
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(idx, column)| {
                let score = self.score(&question_words, column);
                (score > 0).then(|| {
                    (
                        idx,
                        RetrievedChunk {
                            column: column.name.clone(),
                            text: profile(column),
                            score,
                        },
                    )
                })
            })
            .collect();

        chunks
            .into_iter()
            .sorted_by(|(a_idx, a), (b_idx, b)| b.score.cmp(&a.score).then(a_idx.cmp(b_idx)))
            .take(self.max_chunks)
            .map(|(_, chunk)| chunk)
            .collect()
    }

    fn score(&self, question_words: &HashSet<String>, column: &ColumnSchema) -> usize {
        let name = self.matcher.normalize(&column.name);
        let name_hits = name.split(' ').filter(|w| question_words.contains(*w)).count();

        let value_words: HashSet<String> = column
            .stats
            .samples
            .iter()
            .flat_map(|s| {
                self.matcher
                    .normalize(s)
                    .split(' ')
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        let value_hits = value_words.iter().filter(|w| question_words.contains(*w)).count();

        name_hits * NAME_WEIGHT + value_hits * VALUE_WEIGHT
    }
}

impl ContextProvider for SchemaProfileRetriever {
    fn retrieve(&self, question: &str, schema: &Schema) -> Option<String> {
        let chunks = self.rank(question, schema);
        if chunks.is_empty() {
            return None;
        }
        Some(chunks.iter().map(|c| c.text.as_str()).join("\n"))
    }
}

fn profile(column: &ColumnSchema) -> String {
    let stats = &column.stats;
    let mut text = format!(
        "{} is {}: {} distinct, {} null",
        column.name, column.column_type, stats.distinct, stats.nulls
    );
    if let Some(ref numeric) = stats.numeric {
        text.push_str(&format!(", mean {:.2}", numeric.mean));
    }
    if let Some(ref dates) = stats.dates {
        text.push_str(&format!(", {} to {}", dates.earliest, dates.latest));
    }
    if !stats.samples.is_empty() {
        text.push_str(&format!(", values {}", stats.samples.join(", ")));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawTable;
    use crate::schema::SchemaInference;

    fn schema() -> Schema {
        let raw = RawTable::new(
            vec!["department".to_string(), "daily_rate".to_string(), "job_role".to_string()],
            vec![
                vec!["Sales".to_string(), "1102".to_string(), "Manager".to_string()],
                vec!["Research".to_string(), "279".to_string(), "Scientist".to_string()],
                vec!["Sales".to_string(), "1373".to_string(), "Manager".to_string()],
            ],
        );
        SchemaInference::default().infer("data", &raw).unwrap()
    }

    #[test]
    fn test_name_hits_rank_first() {
        let retriever = SchemaProfileRetriever::default();
        let chunks = retriever.rank("daily rate of managers in sales", &schema());
        assert_eq!(chunks[0].column, "daily_rate");
        let columns: Vec<&str> = chunks.iter().map(|c| c.column.as_str()).collect();
        assert!(columns.contains(&"department"));
        assert!(columns.contains(&"job_role"));
    }

    #[test]
    fn test_no_overlap_gives_no_context() {
        let retriever = SchemaProfileRetriever::default();
        assert!(retriever.retrieve("what is the weather", &schema()).is_none());
    }

    #[test]
    fn test_chunk_limit() {
        let retriever = SchemaProfileRetriever::new(1);
        let context = retriever.retrieve("department sales rate", &schema()).unwrap();
        assert_eq!(context.lines().count(), 1);
    }
}
