mod file_config;

pub use file_config::{ConnectConfig, FileConfig, ScheduleConfig, SinkConfig};

use crate::connection::{ConnectPolicy, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_DELAY};
use crate::history_store::EntityId;
use crate::sink::{BlobCredentials, BlobStorageSink, ContainerMap, FilesystemSink, ReportSink};
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INTERVAL_HOURS: u64 = 24;
pub const DEFAULT_OUT_DIR: &str = "reports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ConnectPolicyKind {
    Single,
    #[default]
    Bounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SinkKind {
    #[default]
    Filesystem,
    Blob,
}

/// What a run does when one entity fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EntityErrorPolicy {
    /// Log the failure, continue with the next entity and fail the run at
    /// the end.
    #[default]
    Skip,
    /// Stop the run at the first failure.
    Abort,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db: Option<String>,
    pub connect_policy: ConnectPolicyKind,
    pub connect_attempts: u32,
    pub connect_delay_secs: u64,
    pub sink: SinkKind,
    pub out_dir: Option<PathBuf>,
    pub blob_connection_string: Option<String>,
    pub template_path: Option<PathBuf>,
    pub on_entity_error: EntityErrorPolicy,
    pub interval_hours: u64,
    pub run_on_startup: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db: None,
            connect_policy: ConnectPolicyKind::default(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_delay_secs: DEFAULT_CONNECT_DELAY.as_secs(),
            sink: SinkKind::default(),
            out_dir: None,
            blob_connection_string: None,
            template_path: None,
            on_entity_error: EntityErrorPolicy::default(),
            interval_hours: DEFAULT_INTERVAL_HOURS,
            run_on_startup: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db: String,
    pub template_path: Option<PathBuf>,
    pub on_entity_error: EntityErrorPolicy,

    pub connect: ConnectSettings,
    pub sink: SinkSettings,
    pub schedule: ScheduleSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub kind: ConnectPolicyKind,
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ConnectSettings {
    pub fn policy(&self) -> ConnectPolicy {
        match self.kind {
            ConnectPolicyKind::Single => ConnectPolicy::Single,
            ConnectPolicyKind::Bounded => ConnectPolicy::Bounded {
                max_attempts: self.max_attempts,
                delay: self.delay,
            },
        }
    }
}

#[derive(Clone)]
pub enum SinkSettings {
    Filesystem {
        out_dir: PathBuf,
    },
    Blob {
        connection_string: String,
        containers: ContainerMap,
    },
}

impl std::fmt::Debug for SinkSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkSettings::Filesystem { out_dir } => f
                .debug_struct("Filesystem")
                .field("out_dir", out_dir)
                .finish(),
            SinkSettings::Blob { containers, .. } => f
                .debug_struct("Blob")
                .field("connection_string", &"<redacted>")
                .field("containers", containers)
                .finish(),
        }
    }
}

impl SinkSettings {
    /// Build the configured sink. The blob sink holds a blocking HTTP
    /// client, so call this from a blocking thread.
    pub fn build(&self) -> Result<Box<dyn ReportSink>> {
        Ok(match self {
            SinkSettings::Filesystem { out_dir } => Box::new(FilesystemSink::new(out_dir)),
            SinkSettings::Blob {
                connection_string,
                containers,
            } => Box::new(BlobStorageSink::from_connection_string(
                connection_string,
                containers.clone(),
            )?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub run_on_startup: bool,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db = file.db.or_else(|| cli.db.clone()).ok_or_else(|| {
            anyhow!("database must be specified via --db, SERVERLESS_DB or in config file")
        })?;
        if db.trim().is_empty() {
            bail!("database connection string is empty");
        }

        let template_path = file
            .template_path
            .map(PathBuf::from)
            .or_else(|| cli.template_path.clone());
        if let Some(path) = &template_path {
            if !path.is_file() {
                bail!("Template file not found: {:?}", path);
            }
        }

        let on_entity_error = match file.on_entity_error {
            Some(s) => parse_value_enum::<EntityErrorPolicy>("on_entity_error", &s)?,
            None => cli.on_entity_error,
        };

        let connect_file = file.connect.unwrap_or_default();
        let connect = ConnectSettings {
            kind: match connect_file.policy {
                Some(s) => parse_value_enum::<ConnectPolicyKind>("connect.policy", &s)?,
                None => cli.connect_policy,
            },
            max_attempts: connect_file.max_attempts.unwrap_or(cli.connect_attempts),
            delay: Duration::from_secs(connect_file.delay_secs.unwrap_or(cli.connect_delay_secs)),
        };
        if connect.kind == ConnectPolicyKind::Bounded && connect.max_attempts == 0 {
            bail!("connect attempts must be at least 1");
        }

        let sink_file = file.sink.unwrap_or_default();
        let sink_kind = match sink_file.kind {
            Some(s) => parse_value_enum::<SinkKind>("sink.kind", &s)?,
            None => cli.sink,
        };
        let sink = match sink_kind {
            SinkKind::Filesystem => SinkSettings::Filesystem {
                out_dir: sink_file
                    .out_dir
                    .map(PathBuf::from)
                    .or_else(|| cli.out_dir.clone())
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT_DIR)),
            },
            SinkKind::Blob => {
                let connection_string = sink_file
                    .blob_connection_string
                    .or_else(|| cli.blob_connection_string.clone())
                    .ok_or_else(|| {
                        anyhow!(
                            "blob sink needs a connection string via --blob-connection-string, HTML_ASA_CONN_STRING or in config file"
                        )
                    })?;
                // Fail at startup rather than on the first upload
                BlobCredentials::parse(&connection_string)
                    .context("Invalid blob storage connection string")?;
                let containers = match sink_file.containers {
                    Some(table) => parse_containers(table)?,
                    None => ContainerMap::default(),
                };
                containers.validate()?;
                SinkSettings::Blob {
                    connection_string,
                    containers,
                }
            }
        };

        let schedule_file = file.schedule.unwrap_or_default();
        let interval_hours = schedule_file.interval_hours.unwrap_or(cli.interval_hours);
        if interval_hours == 0 {
            bail!("interval_hours must be at least 1");
        }
        let schedule = ScheduleSettings {
            interval: Duration::from_secs(interval_hours * 3600),
            run_on_startup: schedule_file.run_on_startup.unwrap_or(cli.run_on_startup),
        };

        Ok(Self {
            db,
            template_path,
            on_entity_error,
            connect,
            sink,
            schedule,
        })
    }
}

/// Parses a TOML string value using clap's ValueEnum names.
fn parse_value_enum<T: ValueEnum>(field: &str, s: &str) -> Result<T> {
    T::from_str(s, true).map_err(|_| {
        let accepted: Vec<String> = T::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        anyhow!(
            "Invalid {} '{}', expected one of: {}",
            field,
            s,
            accepted.join(", ")
        )
    })
}

fn parse_containers(table: impl IntoIterator<Item = (String, String)>) -> Result<ContainerMap> {
    table
        .into_iter()
        .map(|(key, container)| {
            let uid: EntityId = key
                .trim()
                .parse()
                .with_context(|| format!("Container key '{}' is not an entity id", key))?;
            Ok((uid, container))
        })
        .collect::<Result<Vec<_>>>()
        .map(ContainerMap::from_iter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn cli_with_db() -> CliConfig {
        CliConfig {
            db: Some("/data/reports.db".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            db: Some("/data/reports.db".to_string()),
            connect_policy: ConnectPolicyKind::Single,
            connect_attempts: 3,
            connect_delay_secs: 1,
            sink: SinkKind::Filesystem,
            out_dir: Some(PathBuf::from("/srv/html")),
            blob_connection_string: None,
            template_path: None,
            on_entity_error: EntityErrorPolicy::Abort,
            interval_hours: 12,
            run_on_startup: false,
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db, "/data/reports.db");
        assert_eq!(config.connect.policy(), ConnectPolicy::Single);
        assert_eq!(config.on_entity_error, EntityErrorPolicy::Abort);
        assert!(matches!(
            config.sink,
            SinkSettings::Filesystem { ref out_dir } if out_dir == &PathBuf::from("/srv/html")
        ));
        assert_eq!(config.schedule.interval, Duration::from_secs(12 * 3600));
        assert!(!config.schedule.run_on_startup);
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&cli_with_db(), None).unwrap();

        assert_eq!(config.connect.policy(), ConnectPolicy::default());
        assert_eq!(config.on_entity_error, EntityErrorPolicy::Skip);
        assert!(matches!(
            config.sink,
            SinkSettings::Filesystem { ref out_dir } if out_dir == &PathBuf::from(DEFAULT_OUT_DIR)
        ));
        assert_eq!(config.schedule.interval, Duration::from_secs(24 * 3600));
        assert!(config.schedule.run_on_startup);
        assert!(config.template_path.is_none());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let file = FileConfig {
            db: Some("/other/reports.db".to_string()),
            on_entity_error: Some("ABORT".to_string()),
            connect: Some(ConnectConfig {
                policy: Some("bounded".to_string()),
                max_attempts: Some(2),
                delay_secs: Some(0),
            }),
            sink: Some(SinkConfig {
                kind: Some("blob".to_string()),
                blob_connection_string: Some("UseDevelopmentStorage=true".to_string()),
                containers: Some(BTreeMap::from([("7".to_string(), "seven".to_string())])),
                ..Default::default()
            }),
            schedule: Some(ScheduleConfig {
                interval_hours: Some(1),
                run_on_startup: Some(false),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli_with_db(), Some(file)).unwrap();

        assert_eq!(config.db, "/other/reports.db");
        assert_eq!(config.on_entity_error, EntityErrorPolicy::Abort);
        assert_eq!(
            config.connect.policy(),
            ConnectPolicy::Bounded {
                max_attempts: 2,
                delay: Duration::ZERO
            }
        );
        match config.sink {
            SinkSettings::Blob { containers, .. } => {
                assert_eq!(containers.resolve(7).unwrap(), "seven");
                assert!(containers.resolve(99).is_err());
            }
            other => panic!("Expected blob sink, got {:?}", other),
        }
        assert_eq!(config.schedule.interval, Duration::from_secs(3600));
        assert!(!config.schedule.run_on_startup);
    }

    #[test]
    fn test_resolve_blob_sink_from_cli_uses_default_containers() {
        let cli = CliConfig {
            sink: SinkKind::Blob,
            blob_connection_string: Some(
                "AccountName=reports;AccountKey=c2VjcmV0".to_string(),
            ),
            ..cli_with_db()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();
        match &config.sink {
            SinkSettings::Blob { containers, .. } => {
                assert_eq!(containers, &ContainerMap::default())
            }
            other => panic!("Expected blob sink, got {:?}", other),
        }
        assert!(!format!("{:?}", config.sink).contains("c2VjcmV0"));
    }

    #[test]
    fn test_resolve_missing_db_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.unwrap_err().to_string().contains("SERVERLESS_DB"));
    }

    #[test]
    fn test_resolve_blob_sink_without_connection_string_error() {
        let cli = CliConfig {
            sink: SinkKind::Blob,
            ..cli_with_db()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("HTML_ASA_CONN_STRING"));
    }

    #[test]
    fn test_resolve_rejects_invalid_values() {
        let bad_files = [
            FileConfig {
                on_entity_error: Some("retry".to_string()),
                ..Default::default()
            },
            FileConfig {
                connect: Some(ConnectConfig {
                    max_attempts: Some(0),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                sink: Some(SinkConfig {
                    kind: Some("ftp".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                sink: Some(SinkConfig {
                    kind: Some("blob".to_string()),
                    blob_connection_string: Some("AccountName=reports".to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                sink: Some(SinkConfig {
                    kind: Some("blob".to_string()),
                    blob_connection_string: Some("UseDevelopmentStorage=true".to_string()),
                    containers: Some(BTreeMap::from([("abc".to_string(), "abc".to_string())])),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                sink: Some(SinkConfig {
                    kind: Some("blob".to_string()),
                    blob_connection_string: Some("UseDevelopmentStorage=true".to_string()),
                    containers: Some(BTreeMap::new()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                schedule: Some(ScheduleConfig {
                    interval_hours: Some(0),
                    ..Default::default()
                }),
                ..Default::default()
            },
            FileConfig {
                template_path: Some("/nonexistent/template.html".to_string()),
                ..Default::default()
            },
        ];

        for file in bad_files {
            let debug = format!("{:?}", file);
            assert!(
                AppConfig::resolve(&cli_with_db(), Some(file)).is_err(),
                "expected error for {}",
                debug
            );
        }
    }

    #[test]
    fn test_single_policy_ignores_attempts() {
        let cli = CliConfig {
            connect_policy: ConnectPolicyKind::Single,
            connect_attempts: 0,
            ..cli_with_db()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.connect.policy(), ConnectPolicy::Single);
    }

    #[test]
    fn test_template_path_must_exist() {
        let temp_dir = TempDir::new().unwrap();
        let template = temp_dir.path().join("report.html");
        std::fs::write(&template, "{% for row in table_rows %}{% endfor %}").unwrap();

        let cli = CliConfig {
            template_path: Some(template.clone()),
            ..cli_with_db()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.template_path, Some(template));
    }

    #[test]
    fn test_sink_settings_build_filesystem() {
        let temp_dir = TempDir::new().unwrap();
        let settings = SinkSettings::Filesystem {
            out_dir: temp_dir.path().to_path_buf(),
        };
        let sink = settings.build().unwrap();
        sink.write_report(1, 1, "<p/>").unwrap();
        assert!(temp_dir.path().join("1").join("1.html").exists());
    }
}
