//! JSON export of the learning database for the web UI.

use std::path::Path;

use kbase_core::KbError;
use serde::Serialize;

use crate::store::{Interaction, Learning, LearningStore};

const EMPTY_NOTE: &str =
    "No learnings captured yet. Use `kbase learn capture` to record interactions.";

#[derive(Debug, Clone, Serialize)]
pub struct LearningExportMetadata {
    pub exported_at: String,
    pub interaction_count: usize,
    pub learning_count: usize,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningExport {
    pub metadata: LearningExportMetadata,
    pub interactions: Vec<Interaction>,
    pub learnings: Vec<Learning>,
}

impl LearningExport {
    fn new(interactions: Vec<Interaction>, learnings: Vec<Learning>, note: Option<&str>) -> Self {
        Self {
            metadata: LearningExportMetadata {
                exported_at: kbase_core::now_iso(),
                interaction_count: interactions.len(),
                learning_count: learnings.len(),
                version: "1.0".into(),
                note: note.map(str::to_string),
            },
            interactions,
            learnings,
        }
    }

    /// Export everything in an open store.
    pub fn from_store(store: &LearningStore) -> Result<Self, KbError> {
        Ok(Self::new(store.interactions()?, store.learnings()?, None))
    }
}

/// Export the database at `db_path`; a missing database gives an empty export with a note.
///
/// # Examples
///
/// ```
/// use kbase_learning::export::export_learnings;
///
/// let dir = tempfile::tempdir().unwrap();
/// let export = export_learnings(&dir.path().join("memory.db")).unwrap();
/// assert_eq!(export.metadata.interaction_count, 0);
/// assert!(export.metadata.note.is_some());
/// ```
pub fn export_learnings(db_path: &Path) -> Result<LearningExport, KbError> {
    if !db_path.exists() {
        tracing::warn!(path = %db_path.display(), "memory database not found, exporting empty set");
        return Ok(LearningExport::new(Vec::new(), Vec::new(), Some(EMPTY_NOTE)));
    }
    let store = LearningStore::open(db_path)?;
    LearningExport::from_store(&store)
}

/// Write the export as pretty JSON, creating parent directories.
pub fn write_export(export: &LearningExport, output: &Path) -> Result<(), KbError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, serde_json::to_string_pretty(export)?)?;
    Ok(())
}
