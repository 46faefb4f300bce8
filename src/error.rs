//! Errors produced while building and publishing a single report.

use crate::history_store::EntityId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to connect to database after {attempts} attempt(s): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Entity {0} not found in source table")]
    NotFound(EntityId),

    #[error("No container configured for entity {0}")]
    UnknownContainer(EntityId),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob upload failed: {0}")]
    Upload(String),

    #[error("Invalid report template: {0}")]
    Template(String),

    #[error("Corrupt history content: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ReportError {
    /// Whether this error concerns a single entity only, as opposed to the
    /// whole run (a broken database or template affects every entity).
    pub fn is_entity_scoped(&self) -> bool {
        matches!(
            self,
            ReportError::NotFound(_)
                | ReportError::UnknownContainer(_)
                | ReportError::Io { .. }
                | ReportError::Upload(_)
                | ReportError::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_scoped_errors() {
        assert!(ReportError::NotFound(1).is_entity_scoped());
        assert!(ReportError::UnknownContainer(1).is_entity_scoped());
        assert!(ReportError::Upload("403".to_string()).is_entity_scoped());
        assert!(!ReportError::Template("unclosed loop".to_string()).is_entity_scoped());
        assert!(!ReportError::Store(anyhow::anyhow!("disk I/O error")).is_entity_scoped());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ReportError::UnknownContainer(42).to_string(),
            "No container configured for entity 42"
        );
        assert_eq!(
            ReportError::NotFound(7).to_string(),
            "Entity 7 not found in source table"
        );
    }
}
