//! Database connection bootstrap.
//!
//! A [`ConnectionProvider`] turns the configured connection string into a
//! [`ScopedConnection`] owned by a single run. The connection is closed
//! exactly once, either through [`ScopedConnection::release`] or when the
//! value is dropped on an early-return or error path.

use crate::error::ReportError;
use crate::history_store::HISTORY_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::ensure_schema;
use rusqlite::Connection;
use std::ops::Deref;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 6;
pub const DEFAULT_CONNECT_DELAY: Duration = Duration::from_secs(10);
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// How many times `acquire` tries to open the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectPolicy {
    /// One attempt, failure is returned as is.
    Single,
    /// Retry database-layer failures with a fixed delay. When every attempt
    /// fails, `acquire` yields no connection instead of an error.
    Bounded { max_attempts: u32, delay: Duration },
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        ConnectPolicy::Bounded {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            delay: DEFAULT_CONNECT_DELAY,
        }
    }
}

pub struct ConnectionProvider {
    conn_string: String,
    policy: ConnectPolicy,
}

impl ConnectionProvider {
    pub fn new(conn_string: impl Into<String>, policy: ConnectPolicy) -> Self {
        Self {
            conn_string: conn_string.into(),
            policy,
        }
    }

    /// Open a connection according to the configured policy.
    ///
    /// Returns `Ok(None)` only under [`ConnectPolicy::Bounded`] once all
    /// attempts failed; callers must treat that as fatal for the run.
    pub fn acquire(&self) -> Result<Option<ScopedConnection>, ReportError> {
        self.acquire_until_cancelled(&CancellationToken::new())
    }

    /// Like [`acquire`](Self::acquire), but stops retrying once `cancel`
    /// fires. A cancelled acquire also yields `Ok(None)`.
    pub fn acquire_until_cancelled(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<ScopedConnection>, ReportError> {
        match self.policy {
            ConnectPolicy::Single => {
                info!("Connecting to DB");
                self.open()
                    .map_err(|source| ReportError::Connection {
                        attempts: 1,
                        source,
                    })
                    .and_then(|conn| self.bootstrap(conn))
                    .map(Some)
            }
            ConnectPolicy::Bounded {
                max_attempts,
                delay,
            } => {
                for attempt in 1..=max_attempts {
                    if cancel.is_cancelled() {
                        warn!("DB connection cancelled before attempt {}", attempt);
                        return Ok(None);
                    }
                    info!("Connecting to DB; attempt {}/{}", attempt, max_attempts);
                    match self.open() {
                        Ok(conn) => return self.bootstrap(conn).map(Some),
                        Err(e) if is_database_error(&e) => {
                            warn!("DB connection attempt {} failed: {}", attempt, e);
                            if attempt < max_attempts {
                                sleep_unless_cancelled(delay, cancel);
                            }
                        }
                        Err(source) => {
                            return Err(ReportError::Connection {
                                attempts: attempt,
                                source,
                            })
                        }
                    }
                }
                error!(
                    "Giving up on DB connection after {} attempts",
                    max_attempts
                );
                Ok(None)
            }
        }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.conn_string)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        // Opening is lazy; touch the file so unreadable databases fail here.
        conn.query_row("PRAGMA schema_version;", [], |row| row.get::<_, i64>(0))?;
        Ok(conn)
    }

    fn bootstrap(&self, mut conn: Connection) -> Result<ScopedConnection, ReportError> {
        ensure_schema(&mut conn, HISTORY_VERSIONED_SCHEMAS)?;
        debug!("Acquired database connection to {}", self.conn_string);
        Ok(ScopedConnection {
            conn,
            _release: ReleaseLog {
                target: self.conn_string.clone(),
            },
        })
    }
}

/// Sleep for `delay`, waking early when `cancel` fires.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + delay;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

fn is_database_error(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(_, _))
}

/// A connection owned by one run.
pub struct ScopedConnection {
    conn: Connection,
    _release: ReleaseLog,
}

impl ScopedConnection {
    /// Close the connection, reporting close failures.
    pub fn release(self) -> Result<(), ReportError> {
        let ScopedConnection { conn, _release } = self;
        conn.close().map_err(|(_, e)| ReportError::Store(e.into()))
    }
}

impl Deref for ScopedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

struct ReleaseLog {
    target: String,
}

impl Drop for ReleaseLog {
    fn drop(&mut self) {
        debug!("Released database connection to {}", self.target);
    }
}
