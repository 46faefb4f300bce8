//! Rolling history accumulation.
//!
//! Each call to [`HistoryAccumulator::get_content`] records one new
//! observation for an entity:
//!
//! ```text
//! source.value + jitter ──► [new observation] ++ latest history snapshot
//!                                     │
//!                                     └──► INSERT history (uid, run_ts, json); COMMIT
//! ```
//!
//! The stored list is newest first and is never pruned. The insert is the
//! only write, so any failure before it leaves the database untouched.

mod clock;
mod jitter;

pub use clock::{format_run_ts, Clock, FixedClock, SystemClock};
pub use jitter::{FixedJitter, JitterSource, RandomJitter, JITTER_MAX};

use crate::error::ReportError;
use crate::history_store::{encode_rows, EntityId, HistoryStore, Observation, ReportContent};
use std::sync::Arc;
use tracing::debug;

pub struct HistoryAccumulator {
    jitter: Arc<dyn JitterSource>,
    clock: Arc<dyn Clock>,
}

impl HistoryAccumulator {
    pub fn new(jitter: Arc<dyn JitterSource>, clock: Arc<dyn Clock>) -> Self {
        Self { jitter, clock }
    }

    /// Random jitter and the local wall clock.
    pub fn system() -> Self {
        Self::new(Arc::new(RandomJitter), Arc::new(SystemClock))
    }

    /// Append a new observation to the entity's history and persist the
    /// resulting snapshot.
    pub fn get_content(
        &self,
        store: &dyn HistoryStore,
        uid: EntityId,
    ) -> Result<ReportContent, ReportError> {
        let run_ts = format_run_ts(self.clock.now());

        let entity = store.get_entity(uid)?.ok_or(ReportError::NotFound(uid))?;
        let jitter = self.jitter.next_jitter();
        let observation = Observation {
            run_ts: run_ts.clone(),
            value: entity.value.saturating_add(jitter),
        };

        let prior = match store.get_latest_snapshot(uid)? {
            Some(snapshot) => snapshot.rows()?,
            None => Vec::new(),
        };
        let table_rows = prepend(observation, prior);

        store.insert_snapshot(uid, &run_ts, &encode_rows(&table_rows)?)?;
        debug!(
            "Recorded value {} (jitter {}) for entity {}; history has {} rows",
            table_rows[0].value,
            jitter,
            uid,
            table_rows.len()
        );

        Ok(ReportContent {
            uid,
            name: entity.name,
            table_rows,
        })
    }
}

/// `[observation] ++ prior`, keeping the newest-first order.
pub fn prepend(observation: Observation, prior: Vec<Observation>) -> Vec<Observation> {
    let mut rows = Vec::with_capacity(prior.len() + 1);
    rows.push(observation);
    rows.extend(prior);
    rows
}
