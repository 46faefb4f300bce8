use super::{report_file_name, ReportSink};
use crate::error::ReportError;
use crate::history_store::EntityId;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Writes reports under `{out_dir}/{uid}/{row_count}.html`.
#[derive(Debug, Clone)]
pub struct FilesystemSink {
    out_dir: PathBuf,
}

impl FilesystemSink {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn report_path(&self, uid: EntityId, row_count: usize) -> PathBuf {
        self.out_dir
            .join(uid.to_string())
            .join(report_file_name(row_count))
    }
}

impl ReportSink for FilesystemSink {
    fn write_report(
        &self,
        uid: EntityId,
        row_count: usize,
        html: &str,
    ) -> Result<String, ReportError> {
        let entity_dir = self.out_dir.join(uid.to_string());
        fs::create_dir_all(&entity_dir).map_err(|source| ReportError::Io {
            path: entity_dir.clone(),
            source,
        })?;

        let path = self.report_path(uid, row_count);
        fs::write(&path, html).map_err(|source| ReportError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Wrote {} bytes to {:?}", html.len(), path);

        Ok(path.display().to_string())
    }
}
