//! Full rebuild of session state from the event log.

use chrono::{DateTime, Utc};
use puff_core::{
    ActiveSession, IdleTimeout, ReconcilePlan, normalize_instant, plan_reconciliation,
};
use rusqlite::Connection;
use serde::Serialize;

use crate::engine::SessionEngine;
use crate::{
    DbError, clear_finalized_sessions, event_timestamps, insert_finalized_session,
    save_active_session,
};

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Events replayed.
    pub events: u64,
    /// Finalized sessions written.
    pub finalized: usize,
    /// The rebuilt in-progress session, if the last one is still fresh.
    pub active: Option<ActiveSession>,
}

impl SessionEngine {
    /// Rebuilds all session state from the event log now.
    pub fn reconcile(&self) -> Result<ReconcileSummary, DbError> {
        self.reconcile_at(Utc::now())
    }

    /// Rebuilds all session state from the event log, as of `now`.
    ///
    /// Every finalized session and the active session are replaced in one
    /// transaction; on failure the previous state is left intact.
    pub fn reconcile_at(&self, now: DateTime<Utc>) -> Result<ReconcileSummary, DbError> {
        let now = normalize_instant(now);
        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let plan = replace_sessions(&tx, now, self.timeout())?;
        tx.commit()?;

        let summary = ReconcileSummary {
            events: plan.event_count(),
            finalized: plan.finalized.len(),
            active: plan.active,
        };
        tracing::info!(
            events = summary.events,
            finalized = summary.finalized,
            active = summary.active.is_some(),
            "sessions rebuilt"
        );
        Ok(summary)
    }
}

/// Plans sessions from every stored event and writes them over the old ones.
///
/// Must run inside a transaction so the replacement is all-or-nothing.
pub(crate) fn replace_sessions(
    conn: &Connection,
    now: DateTime<Utc>,
    timeout: IdleTimeout,
) -> Result<ReconcilePlan, DbError> {
    let timestamps = event_timestamps(conn)?;
    let plan = plan_reconciliation(&timestamps, now, timeout);

    let cleared = clear_finalized_sessions(conn)?;
    tracing::debug!(cleared, "cleared finalized sessions");
    for session in &plan.finalized {
        insert_finalized_session(conn, session)?;
    }
    save_active_session(conn, plan.active.as_ref())?;
    Ok(plan)
}
