//! Column resolution for natural-language phrases
//!
//! Resolution order, applied to normalised text (lowercase, `_`/`-`/`.` as
//! spaces, punctuation dropped, words singularised):
//!
//! 1. `Exact`          - phrase equals the column name
//! 2. `ColumnInPhrase` - column name appears in the phrase as whole words;
//!                       the longest such column wins
//! 3. `PhraseInColumn` - phrase (3+ chars) is a substring of the column name
//! 4. `Similar`        - Jaro-Winkler >= threshold against the phrase or any
//!                       word window of the column's length; highest score wins
//!
//! A lower tier always beats a higher one. Remaining ties go to the column
//! declared first in the schema.

use crate::schema::{ColumnSchema, ColumnType, Schema};
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use strsim::jaro_winkler;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid whitespace pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchTier {
    Exact,
    ColumnInPhrase,
    PhraseInColumn,
    Similar,
}

#[derive(Debug, Clone)]
pub struct ColumnMatch<'a> {
    pub column: &'a ColumnSchema,
    pub tier: MatchTier,
    /// 1.0 for tiers 1-3, the similarity for `Similar`
    pub score: f64,
}

impl<'a> ColumnMatch<'a> {
    pub fn name(&self) -> &'a str {
        &self.column.name
    }
}

/// Fuzzy matcher from question phrases to schema columns
pub struct ColumnMatcher {
    /// Similarity threshold (0.0-1.0) for the `Similar` tier
    pub similarity_threshold: f64,
}

impl Default for ColumnMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.88,
        }
    }
}

impl ColumnMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    pub fn normalize(&self, s: &str) -> String {
        let spaced: String = s
            .to_lowercase()
            .chars()
            .map(|c| match c {
                '_' | '-' | '.' | '/' => ' ',
                c if c.is_alphanumeric() || c.is_whitespace() => c,
                _ => ' ',
            })
            .collect();
        WHITESPACE
            .split(spaced.trim())
            .filter(|w| !w.is_empty())
            .map(singular)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve `phrase` against `columns`, keeping their declaration order.
    pub fn resolve<'a, I>(&self, phrase: &str, columns: I) -> Option<ColumnMatch<'a>>
    where
        I: IntoIterator<Item = &'a ColumnSchema>,
    {
        let phrase = self.normalize(phrase);
        if phrase.is_empty() {
            return None;
        }

        columns
            .into_iter()
            .enumerate()
            .filter_map(|(idx, column)| {
                let name = self.normalize(&column.name);
                self.rank(&phrase, &name).map(|(tier, score)| {
                    (
                        idx,
                        name.len(),
                        ColumnMatch {
                            column,
                            tier,
                            score,
                        },
                    )
                })
            })
            .min_by(|a, b| compare(a, b))
            .map(|(_, _, m)| m)
    }

    /// Resolve among the schema columns of the given types, trying each type
    /// group in turn.
    pub fn resolve_typed<'a>(
        &self,
        phrase: &str,
        schema: &'a Schema,
        types: &[ColumnType],
    ) -> Option<ColumnMatch<'a>> {
        types
            .iter()
            .find_map(|ty| self.resolve(phrase, schema.columns_of(*ty)))
    }

    fn rank(&self, phrase: &str, name: &str) -> Option<(MatchTier, f64)> {
        if name.is_empty() {
            return None;
        }
        if phrase == name {
            return Some((MatchTier::Exact, 1.0));
        }
        if format!(" {} ", phrase).contains(&format!(" {} ", name)) {
            return Some((MatchTier::ColumnInPhrase, 1.0));
        }
        if phrase.len() >= 3 && name.contains(phrase) {
            return Some((MatchTier::PhraseInColumn, 1.0));
        }

        let width = name.split(' ').count();
        let words: Vec<&str> = phrase.split(' ').collect();
        let mut best = jaro_winkler(phrase, name);
        if words.len() > width {
            for window in words.windows(width) {
                best = best.max(jaro_winkler(&window.join(" "), name));
            }
        }
        if best >= self.similarity_threshold {
            Some((MatchTier::Similar, best))
        } else {
            None
        }
    }
}

fn compare(a: &(usize, usize, ColumnMatch<'_>), b: &(usize, usize, ColumnMatch<'_>)) -> Ordering {
    let (a_idx, a_len, a_match) = a;
    let (b_idx, b_len, b_match) = b;
    a_match
        .tier
        .cmp(&b_match.tier)
        .then_with(|| match a_match.tier {
            MatchTier::ColumnInPhrase => b_len.cmp(a_len),
            MatchTier::Similar => b_match
                .score
                .partial_cmp(&a_match.score)
                .unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        })
        .then_with(|| a_idx.cmp(b_idx))
}

fn singular(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        format!("{}y", &word[..word.len() - 3])
    } else if word.len() > 3
        && word.ends_with('s')
        && !word.ends_with("ss")
        && !word.ends_with("us")
        && !word.ends_with("is")
    {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}
