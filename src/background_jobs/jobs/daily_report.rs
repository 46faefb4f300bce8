//! Daily report background job.
//!
//! One run opens a database connection, then for each entity in the
//! `source` table records a new observation, renders the history and hands
//! the page to the configured sink. The connection is released when the run
//! ends, whatever the outcome.

use crate::accumulator::HistoryAccumulator;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior},
};
use crate::config::{AppConfig, EntityErrorPolicy, SinkSettings};
use crate::connection::ConnectionProvider;
use crate::error::ReportError;
use crate::history_store::{EntityId, HistoryStore, SqliteHistoryStore};
use crate::report::ReportRenderer;
use crate::sink::ReportSink;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything one run needs, built at the start of the run.
pub struct RunContext<'a> {
    pub store: &'a dyn HistoryStore,
    pub accumulator: &'a HistoryAccumulator,
    pub renderer: &'a ReportRenderer,
    pub sink: &'a dyn ReportSink,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: Vec<(EntityId, String)>,
}

impl RunContext<'_> {
    /// Record, render and publish the report of one entity. Returns where the
    /// report was written.
    pub fn process_entity(&self, uid: EntityId) -> Result<String, ReportError> {
        let content = self.accumulator.get_content(self.store, uid)?;
        let html = self.renderer.render_content(&content);
        self.sink.write_report(uid, content.row_count(), &html)
    }

    /// Process every entity in source order.
    ///
    /// Under [`EntityErrorPolicy::Skip`] entity-scoped failures are collected
    /// in the summary and the loop moves on; anything else ends the run.
    pub fn run_all(
        &self,
        policy: EntityErrorPolicy,
        job_ctx: &JobContext,
    ) -> Result<RunSummary, JobError> {
        let uids = self
            .store
            .list_entity_ids()
            .map_err(|e| JobError::ExecutionFailed(format!("Failed to list entities: {:#}", e)))?;
        info!("Publishing reports for {} entities", uids.len());

        let mut summary = RunSummary::default();
        for uid in uids {
            if job_ctx.is_cancelled() {
                warn!(
                    "Run cancelled after {} published, {} failed",
                    summary.processed,
                    summary.failed.len()
                );
                return Err(JobError::Cancelled);
            }

            match self.process_entity(uid) {
                Ok(location) => {
                    info!("Published report for entity {} to {}", uid, location);
                    summary.processed += 1;
                }
                Err(e) if policy == EntityErrorPolicy::Skip && e.is_entity_scoped() => {
                    error!("Report for entity {} failed: {:#}", uid, e);
                    summary.failed.push((uid, format!("{:#}", e)));
                }
                Err(e) => {
                    error!(
                        "Report for entity {} failed, aborting run after {} published: {:#}",
                        uid, summary.processed, e
                    );
                    return Err(JobError::ExecutionFailed(format!("entity {}: {:#}", uid, e)));
                }
            }
        }

        info!(
            "Run summary: {} published, {} failed",
            summary.processed,
            summary.failed.len()
        );
        Ok(summary)
    }
}

/// Background job that publishes one HTML report per entity.
pub struct DailyReportJob {
    provider: ConnectionProvider,
    sink: SinkSettings,
    template_path: Option<PathBuf>,
    on_entity_error: EntityErrorPolicy,
    interval: Duration,
    run_on_startup: bool,
    accumulator: HistoryAccumulator,
}

impl DailyReportJob {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            provider: ConnectionProvider::new(config.db.clone(), config.connect.policy()),
            sink: config.sink.clone(),
            template_path: config.template_path.clone(),
            on_entity_error: config.on_entity_error,
            interval: config.schedule.interval,
            run_on_startup: config.schedule.run_on_startup,
            accumulator: HistoryAccumulator::system(),
        }
    }

    /// Replace the jitter and clock sources.
    pub fn with_accumulator(mut self, accumulator: HistoryAccumulator) -> Self {
        self.accumulator = accumulator;
        self
    }

    /// Read at the start of every run.
    fn load_renderer(&self) -> Result<ReportRenderer, ReportError> {
        match &self.template_path {
            Some(path) => ReportRenderer::from_file(path),
            None => Ok(ReportRenderer::default()),
        }
    }
}

impl BackgroundJob for DailyReportJob {
    fn id(&self) -> &'static str {
        "daily_report"
    }

    fn name(&self) -> &'static str {
        "Daily Report"
    }

    fn description(&self) -> &'static str {
        "Record a jittered observation per entity and publish its HTML history"
    }

    fn schedule(&self) -> JobSchedule {
        if self.run_on_startup {
            JobSchedule::Combined {
                interval: Some(self.interval),
                hooks: vec![HookEvent::OnStartup],
            }
        } else {
            JobSchedule::Interval(self.interval)
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // Stops between entities; every committed entity is complete
        ShutdownBehavior::Cancellable
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        info!("Daily report run started");

        let renderer = self
            .load_renderer()
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;
        let sink = self
            .sink
            .build()
            .map_err(|e| JobError::ExecutionFailed(format!("{:#}", e)))?;

        let conn = match self.provider.acquire_until_cancelled(&ctx.cancellation_token) {
            Ok(Some(conn)) => conn,
            Ok(None) if ctx.is_cancelled() => return Err(JobError::Cancelled),
            Ok(None) => {
                return Err(JobError::ExecutionFailed(
                    "No database connection after exhausting retries".to_string(),
                ))
            }
            Err(e) => return Err(JobError::ExecutionFailed(format!("{:#}", e))),
        };

        let store = SqliteHistoryStore::new(&conn);
        let run_ctx = RunContext {
            store: &store,
            accumulator: &self.accumulator,
            renderer: &renderer,
            sink: sink.as_ref(),
        };
        let result = run_ctx.run_all(self.on_entity_error, ctx);

        if let Err(e) = conn.release() {
            warn!("Failed to close database connection: {}", e);
        }

        let summary = result?;
        if !summary.failed.is_empty() {
            let total = summary.processed + summary.failed.len();
            return Err(JobError::ExecutionFailed(format!(
                "{} of {} entities failed",
                summary.failed.len(),
                total
            )));
        }
        Ok(())
    }
}
