//! Tracked events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, normalize_instant};

/// One discrete timestamped occurrence.
///
/// Events are immutable once stored; the only mutation the store allows is
/// deletion (used by undo).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates a new event with a random identifier.
    ///
    /// The timestamp is normalized to millisecond precision.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: EventId::random(),
            timestamp: normalize_instant(timestamp),
        }
    }
}
