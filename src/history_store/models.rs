use serde::{Deserialize, Serialize};

pub type EntityId = i64;

/// A tracked row of the `source` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub uid: EntityId,
    pub name: String,
    pub value: i64,
}

/// One timestamped, jittered sample of an entity's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub run_ts: String,
    pub value: i64,
}

/// A row of the `history` table. `content_json` holds the full newest-first
/// list of observations as of `run_ts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySnapshot {
    pub uid: EntityId,
    pub run_ts: String,
    pub content_json: String,
}

impl HistorySnapshot {
    pub fn rows(&self) -> serde_json::Result<Vec<Observation>> {
        decode_rows(&self.content_json)
    }
}

pub fn encode_rows(rows: &[Observation]) -> serde_json::Result<String> {
    serde_json::to_string(rows)
}

pub fn decode_rows(content_json: &str) -> serde_json::Result<Vec<Observation>> {
    serde_json::from_str(content_json)
}

/// Everything the renderer and the sink need for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportContent {
    pub uid: EntityId,
    pub name: String,
    pub table_rows: Vec<Observation>,
}

impl ReportContent {
    pub fn row_count(&self) -> usize {
        self.table_rows.len()
    }

    /// Name of the published document, e.g. `3.html`.
    pub fn file_name(&self) -> String {
        crate::sink::report_file_name(self.row_count())
    }
}
