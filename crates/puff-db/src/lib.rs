//! Storage layer and session engine for puff tracking.
//!
//! Provides persistence for events and sessions using `rusqlite`, and the
//! [`SessionEngine`] that mutates them.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Session mutations are read-modify-write cycles over the single active
//! session, so they must never interleave. Within a process, [`SessionEngine`]
//! owns the database behind a `Mutex`. Across processes, every mutation runs
//! in an `IMMEDIATE` transaction that takes the store's write lock before it
//! reads the active session, and other writers wait up to [`BUSY_TIMEOUT`].
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in fixed-width ISO 8601 with millisecond
//! precision (e.g., `2024-01-15T10:30:00.000Z`). This ensures:
//! - Lexicographic ordering matches chronological ordering
//! - Human-readable values in the database
//! - Exact equality between stored and in-memory instants
//!
//! ## Session Tables
//!
//! `finalized_sessions` is append-only history. `active_session` holds at most
//! one row (`slot = 1`) persisting the in-progress session. Neither records
//! event membership: it is recovered by range query over `events`.

mod engine;
mod import;
mod reconcile;

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use puff_core::{ActiveSession, Event, EventId, FinalizedSession, SessionId, ValidationError};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use thiserror::Error;

pub use engine::{SessionEngine, SessionSnapshot};
pub use reconcile::ReconcileSummary;

/// How long a writer waits for another connection's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {context}: {timestamp}")]
    TimestampParse {
        context: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A stored row violates a domain invariant.
    #[error("invalid {context} row: {source}")]
    InvalidRow {
        context: &'static str,
        #[source]
        source: ValidationError,
    },
    /// Another thread panicked while holding the engine lock.
    #[error("session engine lock poisoned")]
    LockPoisoned,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch(
            "
            -- Events table: one row per tracked occurrence
            -- timestamp: ISO 8601, millisecond precision (e.g., '2024-01-15T10:30:00.000Z')
            -- rowid keeps insertion order for tie-breaking equal timestamps
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);

            CREATE TABLE IF NOT EXISTS finalized_sessions (
                id TEXT PRIMARY KEY,
                start_ts TEXT NOT NULL,
                end_ts TEXT NOT NULL,
                event_count INTEGER NOT NULL CHECK (event_count >= 1),
                CHECK (start_ts <= end_ts)
            );

            CREATE INDEX IF NOT EXISTS idx_finalized_sessions_end ON finalized_sessions(end_ts);

            CREATE TABLE IF NOT EXISTS active_session (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                start_ts TEXT NOT NULL,
                last_event_ts TEXT NOT NULL,
                event_count INTEGER NOT NULL CHECK (event_count >= 1),
                CHECK (start_ts <= last_event_ts)
            );
            ",
        )?;
        Ok(())
    }

    /// Starts a write transaction holding the store's write lock.
    ///
    /// Dropping it without commit rolls back.
    pub(crate) fn transaction(&mut self) -> Result<Transaction<'_>, DbError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Lists all events ordered by timestamp then insertion order.
    pub fn list_events(&self) -> Result<Vec<Event>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, timestamp
            FROM events
            ORDER BY timestamp ASC, rowid ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp) = row?;
            events.push(event_from_row(id, &timestamp)?);
        }
        Ok(events)
    }

    /// Lists events within a time range.
    ///
    /// The range is inclusive at both ends, matching session windows.
    pub fn list_events_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, DbError> {
        if end < start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT id, timestamp
            FROM events
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC, rowid ASC
            ",
        )?;
        let rows = stmt.query_map([format_timestamp(start), format_timestamp(end)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp) = row?;
            events.push(event_from_row(id, &timestamp)?);
        }
        Ok(events)
    }

    /// Counts stored events.
    pub fn count_events(&self) -> Result<u64, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Lists finalized sessions, most recently ended first.
    pub fn list_finalized_sessions(&self) -> Result<Vec<FinalizedSession>, DbError> {
        self.query_finalized_sessions(i64::MAX)
    }

    /// Lists the `limit` most recently ended finalized sessions.
    pub fn latest_finalized_sessions(&self, limit: usize) -> Result<Vec<FinalizedSession>, DbError> {
        self.query_finalized_sessions(i64::try_from(limit).unwrap_or(i64::MAX))
    }

    fn query_finalized_sessions(&self, limit: i64) -> Result<Vec<FinalizedSession>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, start_ts, end_ts, event_count
            FROM finalized_sessions
            ORDER BY end_ts DESC, start_ts DESC
            LIMIT ?
            ",
        )?;
        let rows = stmt.query_map([limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            let (id, start_ts, end_ts, count) = row?;
            let id = SessionId::new(id).map_err(|source| DbError::InvalidRow {
                context: "finalized session",
                source,
            })?;
            let start_ts = parse_timestamp(&start_ts, "finalized session")?;
            let end_ts = parse_timestamp(&end_ts, "finalized session")?;
            let session = FinalizedSession::new(id, start_ts, end_ts, count).map_err(|source| {
                DbError::InvalidRow {
                    context: "finalized session",
                    source,
                }
            })?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    /// Counts finalized sessions.
    pub fn count_finalized_sessions(&self) -> Result<u64, DbError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM finalized_sessions", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Loads the persisted in-progress session, if any.
    pub fn load_active_session(&self) -> Result<Option<ActiveSession>, DbError> {
        load_active_session(&self.conn)
    }
}

// Statement helpers shared by `Database` reads and engine transactions.
// A `Transaction` derefs to `Connection`, so each works in both places.

pub(crate) fn insert_event(conn: &Connection, event: &Event) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO events (id, timestamp) VALUES (?, ?)",
        params![event.id.as_str(), format_timestamp(event.timestamp)],
    )?;
    Ok(())
}

pub(crate) fn delete_event(conn: &Connection, id: &EventId) -> Result<(), DbError> {
    conn.execute("DELETE FROM events WHERE id = ?", [id.as_str()])?;
    Ok(())
}

/// Returns the most recent event by timestamp, ties broken by insertion order.
pub(crate) fn last_event(conn: &Connection) -> Result<Option<Event>, DbError> {
    let row = conn
        .query_row(
            "SELECT id, timestamp FROM events ORDER BY timestamp DESC, rowid DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;
    row.map(|(id, timestamp)| event_from_row(id, &timestamp))
        .transpose()
}

/// Returns the latest event timestamp within an inclusive range.
pub(crate) fn latest_event_between(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(timestamp) FROM events WHERE timestamp >= ? AND timestamp <= ?",
        [format_timestamp(start), format_timestamp(end)],
        |row| row.get(0),
    )?;
    latest
        .map(|ts| parse_timestamp(&ts, "event"))
        .transpose()
}

/// Returns every event timestamp, ascending.
pub(crate) fn event_timestamps(conn: &Connection) -> Result<Vec<DateTime<Utc>>, DbError> {
    let mut stmt = conn.prepare("SELECT timestamp FROM events ORDER BY timestamp ASC, rowid ASC")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut timestamps = Vec::new();
    for row in rows {
        timestamps.push(parse_timestamp(&row?, "event")?);
    }
    Ok(timestamps)
}

pub(crate) fn insert_finalized_session(
    conn: &Connection,
    session: &FinalizedSession,
) -> Result<(), DbError> {
    // Ids come from the window alone, so a repeat window merges its count.
    conn.execute(
        "
        INSERT INTO finalized_sessions (id, start_ts, end_ts, event_count)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            event_count = finalized_sessions.event_count + excluded.event_count
        ",
        params![
            session.id().as_str(),
            format_timestamp(session.start_ts()),
            format_timestamp(session.end_ts()),
            session.count(),
        ],
    )?;
    Ok(())
}

pub(crate) fn clear_finalized_sessions(conn: &Connection) -> Result<usize, DbError> {
    Ok(conn.execute("DELETE FROM finalized_sessions", [])?)
}

pub(crate) fn load_active_session(conn: &Connection) -> Result<Option<ActiveSession>, DbError> {
    let row = conn
        .query_row(
            "SELECT start_ts, last_event_ts, event_count FROM active_session WHERE slot = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((start_ts, last_event_ts, count)) = row else {
        return Ok(None);
    };
    let start_ts = parse_timestamp(&start_ts, "active session")?;
    let last_event_ts = parse_timestamp(&last_event_ts, "active session")?;
    ActiveSession::new(start_ts, last_event_ts, count)
        .map(Some)
        .map_err(|source| DbError::InvalidRow {
            context: "active session",
            source,
        })
}

/// Persists the in-progress session, or removes it when `None`.
pub(crate) fn save_active_session(
    conn: &Connection,
    session: Option<&ActiveSession>,
) -> Result<(), DbError> {
    match session {
        Some(session) => {
            conn.execute(
                "
                INSERT INTO active_session (slot, start_ts, last_event_ts, event_count)
                VALUES (1, ?, ?, ?)
                ON CONFLICT(slot) DO UPDATE SET
                    start_ts = excluded.start_ts,
                    last_event_ts = excluded.last_event_ts,
                    event_count = excluded.event_count
                ",
                params![
                    format_timestamp(session.start_ts()),
                    format_timestamp(session.last_event_ts()),
                    session.count(),
                ],
            )?;
        }
        None => {
            conn.execute("DELETE FROM active_session", [])?;
        }
    }
    Ok(())
}

fn event_from_row(id: String, timestamp: &str) -> Result<Event, DbError> {
    let id = EventId::new(id).map_err(|source| DbError::InvalidRow {
        context: "event",
        source,
    })?;
    Ok(Event {
        id,
        timestamp: parse_timestamp(timestamp, "event")?,
    })
}

fn parse_timestamp(timestamp: &str, context: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            context,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
