//! SQL candidates and their provenance tags

use crate::error::ValidationRejection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which generator produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SqlOrigin {
    #[serde(rename = "llm")]
    Llm,
    #[serde(rename = "rule-based")]
    RuleBased,
}

impl fmt::Display for SqlOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlOrigin::Llm => write!(f, "llm"),
            SqlOrigin::RuleBased => write!(f, "rule-based"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "rejection", rename_all = "snake_case")]
pub enum ValidationStatus {
    Unvalidated,
    Valid,
    Rejected(ValidationRejection),
}

/// `Low` marks unresolved intent: the SQL is still valid, but downstream
/// stages should say the question was not understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Low,
}

/// Rewrites the validator applied instead of rejecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Correction {
    #[serde(rename = "no_limit_enforced_added")]
    RowCapInjected { cap: u64 },
    LimitClamped { requested: String, cap: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlCandidate {
    pub sql: String,
    pub origin: SqlOrigin,
    pub status: ValidationStatus,
    pub confidence: Confidence,
    /// Rule template that matched, rule-based candidates only
    pub template: Option<String>,
    pub corrections: Vec<Correction>,
}

impl SqlCandidate {
    pub fn llm(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            origin: SqlOrigin::Llm,
            status: ValidationStatus::Unvalidated,
            confidence: Confidence::High,
            template: None,
            corrections: Vec::new(),
        }
    }

    pub fn rule_based(sql: impl Into<String>, template: &str, confidence: Confidence) -> Self {
        Self {
            sql: sql.into(),
            origin: SqlOrigin::RuleBased,
            status: ValidationStatus::Unvalidated,
            confidence,
            template: Some(template.to_string()),
            corrections: Vec::new(),
        }
    }

    pub fn is_low_confidence(&self) -> bool {
        self.confidence == Confidence::Low
    }
}
