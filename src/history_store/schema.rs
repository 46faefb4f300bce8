//! SQLite schema for the report database.
//!
//! `source` holds the tracked entities and their current value, `history`
//! holds one snapshot of the accumulated observations per entity per run.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Source entities and history snapshots
// =============================================================================

const SOURCE_TABLE_V1: Table = Table {
    name: "source",
    columns: &[
        sqlite_column!("uid", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("value", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const HISTORY_TABLE_V1: Table = Table {
    name: "history",
    columns: &[
        sqlite_column!("uid", &SqlType::Integer, non_null = true),
        sqlite_column!("run_ts", &SqlType::Text, non_null = true),
        sqlite_column!("content_json", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_history_uid_run_ts", "uid, run_ts DESC")],
    unique_constraints: &[&["uid", "run_ts"]],
};

pub const HISTORY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[SOURCE_TABLE_V1, HISTORY_TABLE_V1],
    migration: None,
}];
