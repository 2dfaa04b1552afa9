//! Merging externally supplied timestamps into the event log.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use puff_core::{Event, normalize_instant};

use crate::engine::SessionEngine;
use crate::reconcile::replace_sessions;
use crate::{DbError, event_timestamps, insert_event};

impl SessionEngine {
    /// Merges imported instants, reconciling as of now.
    pub fn merge_import(&self, instants: &[DateTime<Utc>]) -> Result<usize, DbError> {
        self.merge_import_at(instants, Utc::now())
    }

    /// Inserts every instant not already stored, then rebuilds sessions.
    ///
    /// Membership is exact-value: an instant already present (or repeated in
    /// the batch) is inserted at most once. Insertion follows ascending
    /// instant order regardless of input order. When at least one event is
    /// added, sessions are rebuilt from the full log in the same transaction;
    /// an import that adds nothing leaves session state untouched.
    ///
    /// Returns the number of events inserted.
    pub fn merge_import_at(
        &self,
        instants: &[DateTime<Utc>],
        now: DateTime<Utc>,
    ) -> Result<usize, DbError> {
        let now = normalize_instant(now);
        let mut candidates: Vec<_> = instants.iter().copied().map(normalize_instant).collect();
        candidates.sort_unstable();

        let mut db = self.lock()?;

        let tx = db.transaction()?;
        let mut existing: HashSet<DateTime<Utc>> = event_timestamps(&tx)?.into_iter().collect();
        let mut inserted = 0;
        for instant in candidates {
            if existing.insert(instant) {
                insert_event(&tx, &Event::new(instant))?;
                inserted += 1;
            }
        }

        if inserted == 0 {
            tracing::debug!(candidates = instants.len(), "import added no new events");
            return Ok(0);
        }

        let plan = replace_sessions(&tx, now, self.timeout())?;
        tx.commit()?;

        tracing::info!(
            candidates = instants.len(),
            inserted,
            finalized = plan.finalized.len(),
            active = plan.active.is_some(),
            "import merged"
        );
        Ok(inserted)
    }
}
