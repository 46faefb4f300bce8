//! Daily HTML report job.
//!
//! For every entity tracked in the `source` table the job records a jittered
//! observation into a rolling JSON history, renders the accumulated history
//! as an HTML page and stores it either on the local filesystem or in a blob
//! container. The library exposes the building blocks for the binary and for
//! the integration tests.

pub mod accumulator;
pub mod background_jobs;
pub mod config;
pub mod connection;
pub mod error;
pub mod history_store;
pub mod report;
pub mod sink;
pub mod sqlite_persistence;

pub use accumulator::{Clock, FixedClock, FixedJitter, HistoryAccumulator, JitterSource};
pub use connection::{ConnectPolicy, ConnectionProvider, ScopedConnection};
pub use error::ReportError;
pub use history_store::{HistoryStore, Observation, ReportContent, SqliteHistoryStore};
pub use report::ReportRenderer;
pub use sink::{BlobStorageSink, ContainerMap, FilesystemSink, ReportSink};
