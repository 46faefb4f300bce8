use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db: Option<String>,
    pub template_path: Option<String>,
    pub on_entity_error: Option<String>,

    // Feature configs
    pub connect: Option<ConnectConfig>,
    pub sink: Option<SinkConfig>,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConnectConfig {
    /// "single" or "bounded"
    pub policy: Option<String>,
    pub max_attempts: Option<u32>,
    pub delay_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SinkConfig {
    /// "filesystem" or "blob"
    pub kind: Option<String>,
    pub out_dir: Option<String>,
    pub blob_connection_string: Option<String>,
    /// Entity id (as a TOML key) to container name.
    pub containers: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_hours: Option<u64>,
    pub run_on_startup: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
