//! The session engine: serializes every change to the in-progress session.
//!
//! Timeouts are evaluated lazily: every mutating operation first finalizes a
//! stale session, and [`SessionEngine::open`] does the same at startup. There
//! is no background timer; a periodic caller can invoke
//! [`SessionEngine::finalize_if_timed_out`] under the same lock instead.
//!
//! The active session is read back from the store inside each transaction,
//! so engines in other processes sharing the file never act on a stale copy.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use puff_core::{
    ActiveSession, Event, FinalizedSession, IdleTimeout, SessionState, normalize_instant,
};
use rusqlite::Connection;
use serde::Serialize;

use crate::{
    Database, DbError, delete_event, insert_event, insert_finalized_session, last_event,
    latest_event_between, load_active_session, save_active_session,
};

/// Point-in-time view of session state for readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub finalized_sessions: u64,
    pub events: u64,
}

/// Serializes all session mutations over one database.
///
/// Each operation holds the lock for its whole transaction. The transaction
/// itself takes the store's write lock before reading the active session, so
/// read-modify-write cycles from other connections cannot interleave.
pub struct SessionEngine {
    db: Mutex<Database>,
    timeout: IdleTimeout,
}

impl SessionEngine {
    /// Opens the engine and finalizes a session left stale since the last run.
    pub fn open(db: Database, timeout: IdleTimeout) -> Result<Self, DbError> {
        Self::open_at(db, timeout, Utc::now())
    }

    /// Opens the engine, evaluating staleness against `now`.
    pub fn open_at(db: Database, timeout: IdleTimeout, now: DateTime<Utc>) -> Result<Self, DbError> {
        let engine = Self {
            db: Mutex::new(db),
            timeout,
        };
        engine.finalize_if_timed_out_at(now)?;
        Ok(engine)
    }

    pub const fn timeout(&self) -> IdleTimeout {
        self.timeout
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Database>, DbError> {
        self.db.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Records one event now.
    pub fn append_event(&self) -> Result<ActiveSession, DbError> {
        self.append_event_at(Utc::now())
    }

    /// Records one event at `now`, extending or opening the active session.
    pub fn append_event_at(&self, now: DateTime<Utc>) -> Result<ActiveSession, DbError> {
        let now = normalize_instant(now);
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let mut active = load_active_session(&tx)?;
        finalize_stale(&tx, &mut active, now, self.timeout)?;

        let event = Event::new(now);
        insert_event(&tx, &event)?;
        let session = active.map_or_else(|| ActiveSession::start(now), |s| s.extend(now));
        save_active_session(&tx, Some(&session))?;
        tx.commit()?;

        tracing::debug!(
            event_id = %event.id,
            timestamp = %now,
            count = session.count(),
            "event appended"
        );
        Ok(session)
    }

    /// Records `count` events at `now`, each in its own critical section.
    pub fn append_events_at(
        &self,
        count: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<ActiveSession>, DbError> {
        let mut session = None;
        for _ in 0..count {
            session = Some(self.append_event_at(now)?);
        }
        Ok(session)
    }

    /// Undoes the most recent event now.
    pub fn undo_last_event(&self) -> Result<bool, DbError> {
        self.undo_last_event_at(Utc::now())
    }

    /// Removes the most recent event if a session is in progress.
    ///
    /// The event removed is the latest by timestamp (ties broken by insertion
    /// order) across the whole store. The session's last event is then re-read
    /// from the store within the old window rather than assumed; with nothing
    /// left in the window it falls back to the session start. Returns whether
    /// an event was removed.
    pub fn undo_last_event_at(&self, now: DateTime<Utc>) -> Result<bool, DbError> {
        let now = normalize_instant(now);
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let mut active = load_active_session(&tx)?;
        finalize_stale(&tx, &mut active, now, self.timeout)?;

        let mut removed = None;
        if let Some(session) = active {
            if let Some(event) = last_event(&tx)? {
                delete_event(&tx, &event.id)?;
                let latest =
                    latest_event_between(&tx, session.start_ts(), session.last_event_ts())?;
                active = session.retract(latest);
                removed = Some(event);
            }
        }
        save_active_session(&tx, active.as_ref())?;
        tx.commit()?;

        match &removed {
            Some(event) => tracing::debug!(
                event_id = %event.id,
                timestamp = %event.timestamp,
                remaining = active.map_or(0, |s| s.count()),
                "event undone"
            ),
            None => tracing::debug!("nothing to undo"),
        }
        Ok(removed.is_some())
    }

    /// Undoes up to `count` events, stopping once nothing is left to undo.
    pub fn undo_events_at(&self, count: u32, now: DateTime<Utc>) -> Result<u32, DbError> {
        let mut undone = 0;
        for _ in 0..count {
            if !self.undo_last_event_at(now)? {
                break;
            }
            undone += 1;
        }
        Ok(undone)
    }

    /// Ends the active session now.
    pub fn end_session_now(&self) -> Result<Option<FinalizedSession>, DbError> {
        self.end_session_now_at(Utc::now())
    }

    /// Finalizes the active session regardless of idle time.
    ///
    /// Returns the session moved into history, if there was one.
    pub fn end_session_now_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<FinalizedSession>, DbError> {
        let now = normalize_instant(now);
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let mut active = load_active_session(&tx)?;
        let expired = finalize_stale(&tx, &mut active, now, self.timeout)?;
        let ended = match active {
            Some(session) => Some(finalize_into(&tx, &session)?),
            None => expired,
        };
        save_active_session(&tx, None)?;
        tx.commit()?;

        if let Some(session) = &ended {
            tracing::debug!(
                session_id = %session.id(),
                count = session.count(),
                "session ended"
            );
        }
        Ok(ended)
    }

    /// Runs the timeout check now.
    pub fn finalize_if_timed_out(&self) -> Result<Option<FinalizedSession>, DbError> {
        self.finalize_if_timed_out_at(Utc::now())
    }

    /// Finalizes the active session if it has been idle for the timeout.
    ///
    /// Idempotent: a no-op when nothing is stale.
    pub fn finalize_if_timed_out_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<FinalizedSession>, DbError> {
        let now = normalize_instant(now);
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let mut active = load_active_session(&tx)?;
        let expired = finalize_stale(&tx, &mut active, now, self.timeout)?;
        if expired.is_some() {
            save_active_session(&tx, None)?;
            tx.commit()?;
        }
        Ok(expired)
    }

    /// Returns the current machine state.
    pub fn state(&self) -> Result<SessionState, DbError> {
        Ok(SessionState::from(self.active_session()?))
    }

    /// Returns the in-progress session, if any.
    pub fn active_session(&self) -> Result<Option<ActiveSession>, DbError> {
        self.lock()?.load_active_session()
    }

    /// Returns a consistent view of session state and store totals.
    pub fn snapshot(&self) -> Result<SessionSnapshot, DbError> {
        let db = self.lock()?;
        Ok(SessionSnapshot {
            state: SessionState::from(db.load_active_session()?),
            finalized_sessions: db.count_finalized_sessions()?,
            events: db.count_events()?,
        })
    }

    /// Lists the events inside the active session's window.
    pub fn current_session_events(&self) -> Result<Vec<Event>, DbError> {
        let db = self.lock()?;
        match db.load_active_session()? {
            Some(session) => db.list_events_in_range(session.start_ts(), session.last_event_ts()),
            None => Ok(Vec::new()),
        }
    }

    /// Lists all events, ascending.
    pub fn events(&self) -> Result<Vec<Event>, DbError> {
        self.lock()?.list_events()
    }

    /// Lists finalized sessions, most recently ended first.
    pub fn finalized_sessions(&self) -> Result<Vec<FinalizedSession>, DbError> {
        self.lock()?.list_finalized_sessions()
    }

    /// Lists the `limit` most recently ended finalized sessions.
    pub fn latest_finalized_sessions(
        &self,
        limit: usize,
    ) -> Result<Vec<FinalizedSession>, DbError> {
        self.lock()?.latest_finalized_sessions(limit)
    }
}

/// Finalizes `active` in place if it has idled past `timeout`.
///
/// The recorded end is the session's last event, not `now`.
fn finalize_stale(
    conn: &Connection,
    active: &mut Option<ActiveSession>,
    now: DateTime<Utc>,
    timeout: IdleTimeout,
) -> Result<Option<FinalizedSession>, DbError> {
    let Some(session) = active.filter(|s| s.is_timed_out(now, timeout)) else {
        return Ok(None);
    };
    let finalized = finalize_into(conn, &session)?;
    *active = None;
    tracing::debug!(
        session_id = %finalized.id(),
        count = finalized.count(),
        idle_since = %session.last_event_ts(),
        "session timed out"
    );
    Ok(Some(finalized))
}

fn finalize_into(conn: &Connection, session: &ActiveSession) -> Result<FinalizedSession, DbError> {
    let finalized = session.finalize();
    insert_finalized_session(conn, &finalized)?;
    Ok(finalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minutes)
    }

    fn engine() -> SessionEngine {
        let db = Database::open_in_memory().expect("open in-memory db");
        SessionEngine::open_at(db, IdleTimeout::DEFAULT, at(0)).expect("open engine")
    }

    #[test]
    fn first_append_opens_session() {
        let engine = engine();
        assert_eq!(engine.state().unwrap(), SessionState::Idle);

        let session = engine.append_event_at(at(0)).unwrap();
        assert_eq!(session, ActiveSession::start(at(0)));
        assert_eq!(engine.events().unwrap().len(), 1);
    }

    #[test]
    fn append_within_timeout_extends_session() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        let session = engine.append_event_at(at(5)).unwrap();
        assert_eq!(session.start_ts(), at(0));
        assert_eq!(session.last_event_ts(), at(5));
        assert_eq!(session.count(), 2);
        assert!(engine.finalized_sessions().unwrap().is_empty());
    }

    #[test]
    fn append_after_timeout_finalizes_previous_session() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        engine.append_event_at(at(5)).unwrap();
        let session = engine.append_event_at(at(20)).unwrap();

        assert_eq!(session, ActiveSession::start(at(20)));
        let history = engine.finalized_sessions().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].start_ts(), at(0));
        assert_eq!(history[0].end_ts(), at(5));
        assert_eq!(history[0].count(), 2);
    }

    #[test]
    fn undo_to_empty_clears_session_and_event() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();

        assert!(engine.undo_last_event_at(at(1)).unwrap());
        assert_eq!(engine.active_session().unwrap(), None);
        assert!(engine.events().unwrap().is_empty());
        assert_eq!(engine.lock().unwrap().load_active_session().unwrap(), None);
    }

    #[test]
    fn undo_recomputes_last_event_from_store() {
        let engine = engine();
        for minute in [0, 5, 10] {
            engine.append_event_at(at(minute)).unwrap();
        }

        assert!(engine.undo_last_event_at(at(11)).unwrap());
        let session = engine.active_session().unwrap().unwrap();
        assert_eq!(session.count(), 2);
        assert_eq!(session.start_ts(), at(0));
        assert_eq!(session.last_event_ts(), at(5));

        let stored: Vec<_> = engine.events().unwrap().iter().map(|e| e.timestamp).collect();
        assert_eq!(stored, vec![at(0), at(5)]);
    }

    #[test]
    fn undo_without_session_is_noop() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        engine.end_session_now_at(at(1)).unwrap();

        assert!(!engine.undo_last_event_at(at(2)).unwrap());
        assert_eq!(engine.events().unwrap().len(), 1);
        assert_eq!(engine.finalized_sessions().unwrap().len(), 1);
    }

    #[test]
    fn undo_after_timeout_finalizes_instead() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();

        assert!(!engine.undo_last_event_at(at(30)).unwrap());
        assert_eq!(engine.events().unwrap().len(), 1);
        assert_eq!(engine.finalized_sessions().unwrap().len(), 1);
    }

    #[test]
    fn undo_events_stops_when_session_empties() {
        let engine = engine();
        engine.append_events_at(2, at(0)).unwrap();
        assert_eq!(engine.undo_events_at(5, at(1)).unwrap(), 2);
        assert_eq!(engine.state().unwrap(), SessionState::Idle);
    }

    #[test]
    fn end_session_now_finalizes_and_clears() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        engine.append_event_at(at(3)).unwrap();

        let ended = engine.end_session_now_at(at(4)).unwrap().unwrap();
        assert_eq!(ended.start_ts(), at(0));
        assert_eq!(ended.end_ts(), at(3));
        assert_eq!(ended.count(), 2);
        assert_eq!(engine.state().unwrap(), SessionState::Idle);

        assert_eq!(engine.end_session_now_at(at(5)).unwrap(), None);
        assert_eq!(engine.finalized_sessions().unwrap().len(), 1);
    }

    #[test]
    fn finalize_if_timed_out_uses_last_event_as_end() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        engine.append_event_at(at(2)).unwrap();

        assert_eq!(engine.finalize_if_timed_out_at(at(13)).unwrap(), None);
        let finalized = engine.finalize_if_timed_out_at(at(14)).unwrap().unwrap();
        assert_eq!(finalized.end_ts(), at(2));
        assert_eq!(engine.finalize_if_timed_out_at(at(15)).unwrap(), None);
        assert_eq!(engine.finalized_sessions().unwrap().len(), 1);
    }

    #[test]
    fn open_restores_and_expires_persisted_session() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("puffs.db");
        {
            let engine =
                SessionEngine::open_at(Database::open(&path).unwrap(), IdleTimeout::DEFAULT, at(0))
                    .unwrap();
            engine.append_event_at(at(0)).unwrap();
            engine.append_event_at(at(1)).unwrap();
        }

        let engine =
            SessionEngine::open_at(Database::open(&path).unwrap(), IdleTimeout::DEFAULT, at(5))
                .unwrap();
        assert_eq!(engine.active_session().unwrap().map(|s| s.count()), Some(2));
        drop(engine);

        let engine =
            SessionEngine::open_at(Database::open(&path).unwrap(), IdleTimeout::DEFAULT, at(30))
                .unwrap();
        assert_eq!(engine.state().unwrap(), SessionState::Idle);
        assert_eq!(engine.finalized_sessions().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_and_current_events_follow_active_window() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();
        engine.append_event_at(at(20)).unwrap();
        engine.append_event_at(at(21)).unwrap();

        let current: Vec<_> = engine
            .current_session_events()
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(current, vec![at(20), at(21)]);

        let snapshot = engine.snapshot().unwrap();
        assert_eq!(snapshot.events, 3);
        assert_eq!(snapshot.finalized_sessions, 1);
        assert_eq!(
            snapshot.state.active().map(ActiveSession::count),
            Some(2)
        );
    }

    fn open_file_engine(path: &std::path::Path, now: DateTime<Utc>) -> SessionEngine {
        SessionEngine::open_at(Database::open(path).unwrap(), IdleTimeout::DEFAULT, now).unwrap()
    }

    #[test]
    fn engines_sharing_a_file_see_each_others_sessions() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("puffs.db");
        let first = open_file_engine(&path, at(0));
        let second = open_file_engine(&path, at(0));

        first.append_event_at(at(1)).unwrap();
        let session = second.append_event_at(at(2)).unwrap();
        assert_eq!(session.start_ts(), at(1));
        assert_eq!(session.count(), 2);
        assert_eq!(first.active_session().unwrap(), Some(session));

        drop((first, second));
        let reopened = open_file_engine(&path, at(3));
        let active = reopened.active_session().unwrap().unwrap();
        assert_eq!(active.start_ts(), at(1));
        assert_eq!(active.last_event_ts(), at(2));
        assert_eq!(active.count(), 2);
        assert_eq!(reopened.events().unwrap().len(), 2);
    }

    #[test]
    fn finalize_from_another_engine_is_not_overwritten() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("puffs.db");
        let writer = open_file_engine(&path, at(0));
        let sweeper = open_file_engine(&path, at(0));

        writer.append_event_at(at(0)).unwrap();
        writer.append_event_at(at(1)).unwrap();
        assert!(sweeper.finalize_if_timed_out_at(at(20)).unwrap().is_some());

        let session = writer.append_event_at(at(21)).unwrap();
        assert_eq!(session, ActiveSession::start(at(21)));
        let history = writer.finalized_sessions().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].count(), 2);
        assert_eq!(writer.events().unwrap().len(), 3);
    }

    #[test]
    fn concurrent_engines_on_one_file_conserve_counts() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("puffs.db");
        drop(open_file_engine(&path, at(0)));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                thread::spawn(move || {
                    let engine = open_file_engine(&path, at(0));
                    for _ in 0..10 {
                        engine.append_event_at(at(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let engine = open_file_engine(&path, at(2));
        assert_eq!(engine.active_session().unwrap().map(|s| s.count()), Some(40));
        assert_eq!(engine.events().unwrap().len(), 40);
    }

    #[test]
    fn concurrent_appends_are_serialized() {
        let engine = Arc::new(engine());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                thread::spawn(move || {
                    for _ in 0..10 {
                        engine.append_event_at(at(1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let session = engine.active_session().unwrap().unwrap();
        assert_eq!(session.count(), 80);
        assert_eq!(engine.events().unwrap().len(), 80);
    }
}
