//! Job implementations.

mod daily_report;

pub use daily_report::{DailyReportJob, RunContext, RunSummary};
