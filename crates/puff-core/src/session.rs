//! Active and finalized sessions.
//!
//! A session is a contiguous run of events in which no idle gap outlasts the
//! [`IdleTimeout`]. At most one session is in progress at a time (the
//! [`ActiveSession`]); once it ends it becomes an immutable
//! [`FinalizedSession`]. Neither stores which events belong to it: membership
//! is the inclusive time window, which is unambiguous because windows never
//! overlap.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{IdleTimeout, SessionId, ValidationError};

/// The single in-progress session.
///
/// Invariants: `start_ts <= last_event_ts` and `count >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveSession {
    start_ts: DateTime<Utc>,
    last_event_ts: DateTime<Utc>,
    count: u32,
}

impl ActiveSession {
    /// Opens a session at its first event.
    #[must_use]
    pub const fn start(at: DateTime<Utc>) -> Self {
        Self {
            start_ts: at,
            last_event_ts: at,
            count: 1,
        }
    }

    /// Rebuilds a session from stored parts, checking its invariants.
    pub fn new(
        start_ts: DateTime<Utc>,
        last_event_ts: DateTime<Utc>,
        count: i64,
    ) -> Result<Self, ValidationError> {
        let count = validate_count(count)?;
        if start_ts > last_event_ts {
            return Err(ValidationError::InvertedWindow {
                start: start_ts,
                end: last_event_ts,
            });
        }
        Ok(Self {
            start_ts,
            last_event_ts,
            count,
        })
    }

    /// Builds a session whose window is already known to be well formed.
    pub(crate) fn from_window(
        start_ts: DateTime<Utc>,
        last_event_ts: DateTime<Utc>,
        count: u32,
    ) -> Self {
        debug_assert!(start_ts <= last_event_ts);
        debug_assert!(count >= 1);
        Self {
            start_ts,
            last_event_ts,
            count,
        }
    }

    pub const fn start_ts(&self) -> DateTime<Utc> {
        self.start_ts
    }

    pub const fn last_event_ts(&self) -> DateTime<Utc> {
        self.last_event_ts
    }

    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Returns the session with one more event at `at`.
    ///
    /// If the clock went backwards past the start, the window is widened so
    /// it still covers the new event.
    #[must_use]
    pub fn extend(&self, at: DateTime<Utc>) -> Self {
        Self {
            start_ts: self.start_ts.min(at),
            last_event_ts: at.max(self.start_ts),
            count: self.count.saturating_add(1),
        }
    }

    /// Returns the session with its latest event removed.
    ///
    /// `latest_remaining` is the newest event still stored inside the old
    /// window; `None` falls back to the session start. Returns `None` when the
    /// session becomes empty.
    #[must_use]
    pub fn retract(&self, latest_remaining: Option<DateTime<Utc>>) -> Option<Self> {
        let count = self.count.checked_sub(1).filter(|count| *count > 0)?;
        let last_event_ts = latest_remaining
            .filter(|ts| *ts >= self.start_ts)
            .unwrap_or(self.start_ts);
        Some(Self {
            start_ts: self.start_ts,
            last_event_ts,
            count,
        })
    }

    /// Whether the idle gap since the last event has reached `timeout`.
    pub fn is_timed_out(&self, now: DateTime<Utc>, timeout: IdleTimeout) -> bool {
        timeout.is_reached(now.signed_duration_since(self.last_event_ts))
    }

    /// Closes the session into history.
    #[must_use]
    pub fn finalize(&self) -> FinalizedSession {
        FinalizedSession::from_window(
            self.start_ts,
            self.start_ts.max(self.last_event_ts),
            self.count,
        )
    }
}

/// An immutable, completed session.
///
/// Invariants: `start_ts <= end_ts` and `count >= 1`. The id is derived from
/// the window alone; storing a second session with an identical window adds
/// its count to the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizedSession {
    id: SessionId,
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
    count: u32,
}

impl FinalizedSession {
    /// Rebuilds a finalized session from stored parts, checking its invariants.
    pub fn new(
        id: SessionId,
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
        count: i64,
    ) -> Result<Self, ValidationError> {
        let count = validate_count(count)?;
        if start_ts > end_ts {
            return Err(ValidationError::InvertedWindow {
                start: start_ts,
                end: end_ts,
            });
        }
        Ok(Self {
            id,
            start_ts,
            end_ts,
            count,
        })
    }

    /// Builds a session whose window is already known to be well formed.
    pub(crate) fn from_window(start_ts: DateTime<Utc>, end_ts: DateTime<Utc>, count: u32) -> Self {
        debug_assert!(start_ts <= end_ts);
        debug_assert!(count >= 1);
        Self {
            id: SessionId::for_window(start_ts, end_ts),
            start_ts,
            end_ts,
            count,
        }
    }

    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    pub const fn start_ts(&self) -> DateTime<Utc> {
        self.start_ts
    }

    pub const fn end_ts(&self) -> DateTime<Utc> {
        self.end_ts
    }

    pub const fn count(&self) -> u32 {
        self.count
    }
}

/// State of the session machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No session in progress.
    #[default]
    Idle,
    /// A session is collecting events.
    InProgress(ActiveSession),
}

impl SessionState {
    pub const fn active(&self) -> Option<&ActiveSession> {
        match self {
            Self::Idle => None,
            Self::InProgress(session) => Some(session),
        }
    }
}

impl From<Option<ActiveSession>> for SessionState {
    fn from(active: Option<ActiveSession>) -> Self {
        active.map_or(Self::Idle, Self::InProgress)
    }
}

fn validate_count(count: i64) -> Result<u32, ValidationError> {
    u32::try_from(count)
        .ok()
        .filter(|count| *count >= 1)
        .ok_or(ValidationError::EmptySession { count })
}
