//! Destinations for rendered reports.

mod blob_storage;
mod credentials;
mod filesystem;

pub use blob_storage::{BlobStorageSink, BLOB_API_VERSION};
pub use credentials::{put_string_to_sign, sign, BlobAuth, BlobCredentials};
pub use filesystem::FilesystemSink;

use crate::error::ReportError;
use crate::history_store::EntityId;
use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Persists one rendered report.
pub trait ReportSink: Send + Sync {
    /// Store `html` as `{row_count}.html` for the entity and return where it
    /// ended up (a path or a URL), for logging.
    fn write_report(
        &self,
        uid: EntityId,
        row_count: usize,
        html: &str,
    ) -> Result<String, ReportError>;
}

pub fn report_file_name(row_count: usize) -> String {
    format!("{}.html", row_count)
}

/// Entity id to blob container lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerMap(BTreeMap<EntityId, String>);

impl Default for ContainerMap {
    fn default() -> Self {
        Self(BTreeMap::from([
            (99, "99-fau".to_string()),
            (100, "100-fau".to_string()),
        ]))
    }
}

impl FromIterator<(EntityId, String)> for ContainerMap {
    fn from_iter<T: IntoIterator<Item = (EntityId, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl ContainerMap {
    pub fn resolve(&self, uid: EntityId) -> Result<&str, ReportError> {
        self.0
            .get(&uid)
            .map(String::as_str)
            .ok_or(ReportError::UnknownContainer(uid))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The map must not be empty. Container names must be 3-63 characters of lowercase letters, digits
    /// and single hyphens, starting and ending with a letter or digit.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            bail!("No blob containers configured");
        }
        for (uid, container) in &self.0 {
            let valid_chars = container
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !(3..=63).contains(&container.len())
                || !valid_chars
                || container.starts_with('-')
                || container.ends_with('-')
                || container.contains("--")
            {
                bail!("Invalid container name '{}' for entity {}", container, uid);
            }
        }
        Ok(())
    }
}
