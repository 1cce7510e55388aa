use std::path::Path;

use kbase_core::KbError;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::analyzer::GapAnalysis;

/// One recorded assistant interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: i64,
    pub timestamp: String,
    pub user_context: String,
    pub agent_response: String,
    pub user_feedback: Option<String>,
    pub identified_gap: bool,
    pub created_issue_id: Option<u64>,
    pub created_at: String,
}

/// A knowledge gap found in an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Learning {
    pub id: i64,
    pub interaction_id: i64,
    pub concept: String,
    pub gap_type: Option<String>,
    pub proposed_fix: Option<String>,
    pub status: String,
    pub issue_number: Option<u64>,
    pub created_at: String,
    /// Context of the interaction the gap came from.
    pub user_context: Option<String>,
}

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ISSUED: &str = "issued";

const LEARNING_COLUMNS: &str = "l.id, l.interaction_id, l.concept, l.gap_type, l.proposed_fix, \
                                l.status, l.issue_number, l.created_at, i.user_context";

/// SQLite store for interactions and the learnings derived from them.
///
/// # Examples
///
/// ```
/// use kbase_learning::LearningStore;
///
/// let store = LearningStore::in_memory().unwrap();
/// let id = store.capture("How do I list buckets?", "Use GET /v2/storage/buckets", None).unwrap();
/// store.add_feedback(id, 4, "worked").unwrap();
/// assert_eq!(
///     store.get_interaction(id).unwrap().user_feedback.as_deref(),
///     Some("Rating: 4/5. worked")
/// );
/// ```
pub struct LearningStore {
    conn: Connection,
}

impl LearningStore {
    /// Open or create the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Database`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, KbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KbError::Database(format!("failed to create memory directory: {e}"))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| KbError::Database(format!("failed to open memory database: {e}")))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, KbError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            KbError::Database(format!("failed to create in-memory database: {e}"))
        })?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), KbError> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS interactions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    timestamp TEXT NOT NULL,
                    user_context TEXT,
                    agent_response TEXT,
                    user_feedback TEXT,
                    identified_gap INTEGER NOT NULL DEFAULT 0,
                    created_issue_id INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS learnings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    interaction_id INTEGER NOT NULL REFERENCES interactions(id),
                    concept TEXT NOT NULL,
                    gap_type TEXT,
                    proposed_fix TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    issue_number INTEGER,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_learnings_status ON learnings(status);
                ",
            )
            .map_err(|e| KbError::Database(format!("failed to initialize schema: {e}")))
    }

    /// Record an interaction and return its id.
    pub fn capture(
        &self,
        context: &str,
        response: &str,
        feedback: Option<&str>,
    ) -> Result<i64, KbError> {
        let now = kbase_core::now_iso();
        self.conn
            .execute(
                "INSERT INTO interactions (timestamp, user_context, agent_response, user_feedback, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![now, context, response, feedback, now],
            )
            .map_err(|e| KbError::Database(format!("failed to capture interaction: {e}")))?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!(id, "interaction captured");
        Ok(id)
    }

    /// Attach a 1-5 rating and comment to an interaction.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Validation`] for a rating outside 1..=5 and
    /// [`KbError::NotFound`] for an unknown interaction.
    pub fn add_feedback(&self, id: i64, rating: u8, comment: &str) -> Result<(), KbError> {
        if !(1..=5).contains(&rating) {
            return Err(KbError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        let feedback = format!("Rating: {rating}/5. {}", comment.trim());
        let updated = self
            .conn
            .execute(
                "UPDATE interactions SET user_feedback = ?1 WHERE id = ?2",
                params![feedback.trim_end(), id],
            )
            .map_err(|e| KbError::Database(format!("failed to store feedback: {e}")))?;
        if updated == 0 {
            return Err(KbError::NotFound(format!("interaction {id}")));
        }
        Ok(())
    }

    pub fn get_interaction(&self, id: i64) -> Result<Interaction, KbError> {
        self.conn
            .query_row(
                "SELECT id, timestamp, user_context, agent_response, user_feedback,
                        identified_gap, created_issue_id, created_at
                 FROM interactions WHERE id = ?1",
                params![id],
                row_to_interaction,
            )
            .optional()
            .map_err(|e| KbError::Database(format!("failed to read interaction: {e}")))?
            .ok_or_else(|| KbError::NotFound(format!("interaction {id}")))
    }

    /// Newest first.
    pub fn interactions(&self) -> Result<Vec<Interaction>, KbError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, user_context, agent_response, user_feedback,
                        identified_gap, created_issue_id, created_at
                 FROM interactions ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map([], row_to_interaction)
            .map_err(|e| KbError::Database(format!("failed to list interactions: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| KbError::Database(format!("failed to read interaction: {e}")))
    }

    /// Store a gap found by [`crate::analyze`] and flag its interaction.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Validation`] if the analysis found no gap and
    /// [`KbError::NotFound`] for an unknown interaction.
    pub fn store_learning(&self, interaction_id: i64, analysis: &GapAnalysis) -> Result<i64, KbError> {
        let Some(concept) = analysis.concept.as_deref().filter(|_| analysis.has_gap) else {
            return Err(KbError::Validation(
                "analysis did not identify a knowledge gap".into(),
            ));
        };
        self.get_interaction(interaction_id)?;

        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| KbError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "INSERT INTO learnings (interaction_id, concept, gap_type, proposed_fix, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                interaction_id,
                concept,
                analysis.gap_type,
                analysis.proposed_fix,
                STATUS_PENDING,
                kbase_core::now_iso()
            ],
        )
        .map_err(|e| KbError::Database(format!("failed to store learning: {e}")))?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "UPDATE interactions SET identified_gap = 1 WHERE id = ?1",
            params![interaction_id],
        )
        .map_err(|e| KbError::Database(format!("failed to flag interaction: {e}")))?;
        tx.commit()
            .map_err(|e| KbError::Database(format!("failed to commit learning: {e}")))?;

        tracing::info!(id, interaction_id, concept, "learning stored");
        Ok(id)
    }

    /// Learnings still waiting for an issue, oldest first.
    pub fn pending_learnings(&self) -> Result<Vec<Learning>, KbError> {
        self.query_learnings(
            &format!(
                "SELECT {LEARNING_COLUMNS} FROM learnings l
                 JOIN interactions i ON l.interaction_id = i.id
                 WHERE l.status = ?1 ORDER BY l.id"
            ),
            params![STATUS_PENDING],
        )
    }

    /// All learnings, newest first.
    pub fn learnings(&self) -> Result<Vec<Learning>, KbError> {
        self.query_learnings(
            &format!(
                "SELECT {LEARNING_COLUMNS} FROM learnings l
                 LEFT JOIN interactions i ON l.interaction_id = i.id
                 ORDER BY l.created_at DESC, l.id DESC"
            ),
            [],
        )
    }

    fn query_learnings(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Learning>, KbError> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| KbError::Database(format!("failed to prepare query: {e}")))?;
        let rows = stmt
            .query_map(params, row_to_learning)
            .map_err(|e| KbError::Database(format!("failed to list learnings: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| KbError::Database(format!("failed to read learning: {e}")))
    }

    /// Record that an issue was opened for a learning.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::NotFound`] for an unknown learning.
    pub fn mark_issued(&self, learning_id: i64, issue_number: u64) -> Result<(), KbError> {
        let interaction_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT interaction_id FROM learnings WHERE id = ?1",
                params![learning_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| KbError::Database(format!("failed to read learning: {e}")))?;
        let Some(interaction_id) = interaction_id else {
            return Err(KbError::NotFound(format!("learning {learning_id}")));
        };

        let issue = issue_number as i64;
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(|e| KbError::Database(format!("failed to begin transaction: {e}")))?;
        tx.execute(
            "UPDATE learnings SET status = ?1, issue_number = ?2 WHERE id = ?3",
            params![STATUS_ISSUED, issue, learning_id],
        )
        .map_err(|e| KbError::Database(format!("failed to update learning: {e}")))?;
        tx.execute(
            "UPDATE interactions SET created_issue_id = ?1 WHERE id = ?2",
            params![issue, interaction_id],
        )
        .map_err(|e| KbError::Database(format!("failed to update interaction: {e}")))?;
        tx.commit()
            .map_err(|e| KbError::Database(format!("failed to commit: {e}")))?;
        Ok(())
    }
}

fn row_to_interaction(row: &Row<'_>) -> rusqlite::Result<Interaction> {
    Ok(Interaction {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        user_context: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        agent_response: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        user_feedback: row.get(4)?,
        identified_gap: row.get::<_, i64>(5)? != 0,
        created_issue_id: row.get::<_, Option<i64>>(6)?.map(|n| n as u64),
        created_at: row.get(7)?,
    })
}

fn row_to_learning(row: &Row<'_>) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: row.get(0)?,
        interaction_id: row.get(1)?,
        concept: row.get(2)?,
        gap_type: row.get(3)?,
        proposed_fix: row.get(4)?,
        status: row.get(5)?,
        issue_number: row.get::<_, Option<i64>>(6)?.map(|n| n as u64),
        created_at: row.get(7)?,
        user_context: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(concept: &str) -> GapAnalysis {
        GapAnalysis {
            has_gap: true,
            concept: Some(concept.into()),
            gap_type: Some("missing_info".into()),
            proposed_fix: Some("Add a section on rate limits".into()),
        }
    }

    #[test]
    fn feedback_rating_is_validated() {
        let store = LearningStore::in_memory().unwrap();
        let id = store.capture("ctx", "resp", None).unwrap();
        assert!(matches!(store.add_feedback(id, 0, "x"), Err(KbError::Validation(_))));
        assert!(matches!(store.add_feedback(id, 6, "x"), Err(KbError::Validation(_))));
        assert!(matches!(store.add_feedback(999, 3, "x"), Err(KbError::NotFound(_))));
        store.add_feedback(id, 2, "").unwrap();
        assert_eq!(
            store.get_interaction(id).unwrap().user_feedback.as_deref(),
            Some("Rating: 2/5.")
        );
    }

    #[test]
    fn learning_lifecycle() {
        let store = LearningStore::in_memory().unwrap();
        let first = store.capture("rate limits?", "no idea", Some("wrong")).unwrap();
        let second = store.capture("buckets?", "GET /buckets", None).unwrap();

        let l1 = store.store_learning(first, &gap("Storage API")).unwrap();
        store.store_learning(second, &gap("Buckets")).unwrap();
        assert!(store.get_interaction(first).unwrap().identified_gap);

        let pending = store.pending_learnings().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].concept, "Storage API");
        assert_eq!(pending[0].user_context.as_deref(), Some("rate limits?"));

        store.mark_issued(l1, 42).unwrap();
        let pending = store.pending_learnings().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].concept, "Buckets");

        let issued = store.learnings().unwrap().into_iter().find(|l| l.id == l1).unwrap();
        assert_eq!(issued.status, STATUS_ISSUED);
        assert_eq!(issued.issue_number, Some(42));
        assert_eq!(store.get_interaction(first).unwrap().created_issue_id, Some(42));
    }

    #[test]
    fn no_gap_is_not_stored() {
        let store = LearningStore::in_memory().unwrap();
        let id = store.capture("ctx", "resp", None).unwrap();
        let err = store.store_learning(id, &GapAnalysis::none()).unwrap_err();
        assert!(matches!(err, KbError::Validation(_)));
        assert!(!store.get_interaction(id).unwrap().identified_gap);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = LearningStore::in_memory().unwrap();
        assert!(matches!(store.store_learning(7, &gap("x")), Err(KbError::NotFound(_))));
        assert!(matches!(store.mark_issued(7, 1), Err(KbError::NotFound(_))));
        assert!(matches!(store.get_interaction(7), Err(KbError::NotFound(_))));
    }
}
