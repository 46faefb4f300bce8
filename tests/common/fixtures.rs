//! Test environment: a scratch directory with a seeded database.

use super::constants::*;
use chrono::{NaiveDate, NaiveDateTime};
use daily_html::background_jobs::jobs::DailyReportJob;
use daily_html::config::{AppConfig, CliConfig, ConnectPolicyKind, EntityErrorPolicy, SinkKind};
use daily_html::connection::{ConnectPolicy, ConnectionProvider};
use daily_html::history_store::{
    decode_rows, Entity, EntityId, HistoryStore, Observation, SqliteHistoryStore,
};
use daily_html::{FixedClock, FixedJitter, HistoryAccumulator};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestEnv {
    // Kept alive for the lifetime of the test
    _temp_dir: TempDir,
    pub db: String,
    pub out_dir: PathBuf,
}

#[allow(dead_code)]
impl TestEnv {
    /// A database holding Widget (99) and Gadget (100) with no history.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = temp_dir
            .path()
            .join("report.db")
            .to_string_lossy()
            .to_string();
        let out_dir = temp_dir.path().join("out");

        let env = Self {
            _temp_dir: temp_dir,
            db,
            out_dir,
        };
        env.add_entity(WIDGET_UID, WIDGET_NAME, WIDGET_VALUE);
        env.add_entity(GADGET_UID, GADGET_NAME, GADGET_VALUE);
        env
    }

    pub fn add_entity(&self, uid: EntityId, name: &str, value: i64) {
        let conn = ConnectionProvider::new(self.db.clone(), ConnectPolicy::Single)
            .acquire()
            .unwrap()
            .unwrap();
        SqliteHistoryStore::new(&conn)
            .upsert_entity(&Entity {
                uid,
                name: name.to_string(),
                value,
            })
            .unwrap();
        conn.release().unwrap();
    }

    pub fn filesystem_config(&self) -> AppConfig {
        self.config(CliConfig {
            sink: SinkKind::Filesystem,
            out_dir: Some(self.out_dir.clone()),
            ..Default::default()
        })
    }

    pub fn blob_config(&self, endpoint: &str) -> AppConfig {
        self.config(CliConfig {
            sink: SinkKind::Blob,
            blob_connection_string: Some(format!(
                "BlobEndpoint={};AccountName=devstoreaccount1;AccountKey={}",
                endpoint, ACCOUNT_KEY
            )),
            ..Default::default()
        })
    }

    fn config(&self, cli: CliConfig) -> AppConfig {
        AppConfig::resolve(
            &CliConfig {
                db: Some(self.db.clone()),
                connect_policy: ConnectPolicyKind::Single,
                on_entity_error: EntityErrorPolicy::Skip,
                ..cli
            },
            None,
        )
        .unwrap()
    }

    /// Job with fixed jitter and a clock stopped at `at`.
    pub fn job(&self, config: &AppConfig, jitter: i64, at: NaiveDateTime) -> DailyReportJob {
        DailyReportJob::new(config).with_accumulator(HistoryAccumulator::new(
            Arc::new(FixedJitter(jitter)),
            Arc::new(FixedClock::new(at)),
        ))
    }

    pub fn report_path(&self, uid: EntityId, row_count: usize) -> PathBuf {
        self.out_dir
            .join(uid.to_string())
            .join(format!("{}.html", row_count))
    }

    pub fn read_report(&self, uid: EntityId, row_count: usize) -> String {
        std::fs::read_to_string(self.report_path(uid, row_count)).unwrap()
    }

    /// Rows of the latest stored snapshot, empty if there is none.
    pub fn latest_rows(&self, uid: EntityId) -> Vec<Observation> {
        let conn = rusqlite::Connection::open(&self.db).unwrap();
        SqliteHistoryStore::new(&conn)
            .get_latest_snapshot(uid)
            .unwrap()
            .map(|snapshot| decode_rows(&snapshot.content_json).unwrap())
            .unwrap_or_default()
    }

    pub fn raw_latest_json(&self, uid: EntityId) -> Option<String> {
        let conn = rusqlite::Connection::open(&self.db).unwrap();
        SqliteHistoryStore::new(&conn)
            .get_latest_snapshot(uid)
            .unwrap()
            .map(|snapshot| snapshot.content_json)
    }
}

/// Midnight of the given day of January 2024.
#[allow(dead_code)]
pub fn january(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}
