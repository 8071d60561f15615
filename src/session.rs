//! Session store
//!
//! Maps dataset ids to `Arc<Dataset>` snapshots. Replacing a dataset swaps the
//! `Arc`, so a query that already took a snapshot keeps running against the
//! old table until it finishes.

use crate::candidate::SqlOrigin;
use crate::dataset::Dataset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// One answered question, kept for the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub origin: SqlOrigin,
}

struct Session {
    dataset: Arc<Dataset>,
    history: Vec<Turn>,
}

/// Per-request view of a session. Owns its snapshot; nothing in it changes
/// when the store is updated.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub dataset_id: Uuid,
    pub dataset: Arc<Dataset>,
    pub history: Vec<Turn>,
}

impl SessionContext {
    /// Context with no stored history, for callers that manage datasets themselves.
    pub fn detached(dataset: Arc<Dataset>) -> Self {
        Self {
            dataset_id: dataset.id(),
            dataset,
            history: Vec::new(),
        }
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    max_history: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SessionStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// Register a freshly uploaded dataset; its id becomes the session id.
    pub fn insert(&self, dataset: Dataset) -> Uuid {
        let id = dataset.id();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            id,
            Session {
                dataset: Arc::new(dataset),
                history: Vec::new(),
            },
        );
        info!("Registered dataset session {}", id);
        id
    }

    /// Swap the dataset behind `id`. History is cleared since earlier SQL
    /// targeted the old columns. Returns false if the session does not exist.
    pub fn replace(&self, id: Uuid, dataset: Dataset) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&id) {
            Some(session) => {
                session.dataset = Arc::new(dataset);
                session.history.clear();
                info!("Replaced dataset for session {}", id);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.remove(&id).is_some()
    }

    /// Snapshot the session with at most `turns` recent history entries.
    pub fn context(&self, id: Uuid, turns: usize) -> Option<SessionContext> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions.get(&id).map(|s| {
            let skip = s.history.len().saturating_sub(turns);
            SessionContext {
                dataset_id: id,
                dataset: Arc::clone(&s.dataset),
                history: s.history[skip..].to_vec(),
            }
        })
    }

    /// Append a turn, unless the dataset was replaced while the question was
    /// being answered.
    pub fn record_turn(&self, ctx: &SessionContext, turn: Turn) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&ctx.dataset_id) {
            Some(session) if Arc::ptr_eq(&session.dataset, &ctx.dataset) => {
                session.history.push(turn);
                let overflow = session.history.len().saturating_sub(self.max_history);
                session.history.drain(..overflow);
                true
            }
            _ => {
                debug!("Dropping turn for stale snapshot of session {}", ctx.dataset_id);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RawTable;
    use crate::schema::SchemaInference;

    fn dataset(rows: &[&str]) -> Dataset {
        let raw = RawTable::new(
            vec!["city".to_string()],
            rows.iter().map(|r| vec![r.to_string()]).collect(),
        );
        Dataset::from_raw("cities.csv", "data", &raw, &SchemaInference::default()).unwrap()
    }

    fn turn(q: &str) -> Turn {
        Turn {
            question: q.to_string(),
            sql: "SELECT * FROM data".to_string(),
            columns: vec!["city".to_string()],
            origin: SqlOrigin::RuleBased,
        }
    }

    #[test]
    fn test_replace_keeps_inflight_snapshot() {
        let store = SessionStore::default();
        let id = store.insert(dataset(&["Oslo", "Lima"]));
        let before = store.context(id, 1).unwrap();

        assert!(store.replace(id, dataset(&["Pune"])));
        let after = store.context(id, 1).unwrap();

        assert_eq!(before.dataset.schema().row_count(), 2);
        assert_eq!(after.dataset.schema().row_count(), 1);
        assert!(!Arc::ptr_eq(&before.dataset, &after.dataset));
    }

    #[test]
    fn test_stale_turn_is_not_recorded() {
        let store = SessionStore::default();
        let id = store.insert(dataset(&["Oslo"]));
        let ctx = store.context(id, 1).unwrap();
        assert!(store.record_turn(&ctx, turn("first")));

        store.replace(id, dataset(&["Lima"]));
        assert!(!store.record_turn(&ctx, turn("second")));
        assert!(store.context(id, 5).unwrap().history.is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let store = SessionStore::new(2);
        let id = store.insert(dataset(&["Oslo"]));
        let ctx = store.context(id, 0).unwrap();
        for q in ["a", "b", "c"] {
            store.record_turn(&ctx, turn(q));
        }
        let history = store.context(id, 5).unwrap().history;
        let questions: Vec<&str> = history.iter().map(|t| t.question.as_str()).collect();
        assert_eq!(questions, vec!["b", "c"]);
        assert_eq!(store.context(id, 1).unwrap().history.len(), 1);
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::default();
        assert!(store.context(Uuid::new_v4(), 1).is_none());
        assert!(!store.replace(Uuid::new_v4(), dataset(&["Oslo"])));
        assert!(store.is_empty());
    }
}
