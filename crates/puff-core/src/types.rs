//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The idle timeout must be a positive duration.
    #[error("idle timeout must be positive, got {seconds}s")]
    NonPositiveTimeout { seconds: i64 },

    /// A session window ends before it starts.
    #[error("session window ends before it starts: {start} > {end}")]
    InvertedWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A session must contain at least one event.
    #[error("session event count must be at least 1, got {count}")]
    EmptySession { count: i64 },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated event identifier.
    ///
    /// Event IDs are opaque non-empty strings. Uniqueness is enforced at the
    /// database level.
    EventId, "event ID"
);

define_string_id!(
    /// A validated finalized-session identifier.
    SessionId, "session ID"
);

impl EventId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl SessionId {
    /// Derives the identifier of a finalized session from its window.
    ///
    /// Session windows are disjoint, so the window determines the session and
    /// rebuilding history from the same events yields the same identifiers.
    /// The count is left out: a session stored again under the same window
    /// merges its count into the existing row and keeps this identifier.
    #[must_use]
    pub fn for_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let content = format!(
            "session|{}|{}",
            start.timestamp_millis(),
            end.timestamp_millis()
        );
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, content.as_bytes()).to_string())
    }
}

/// Maximum idle gap between consecutive events before a session ends.
///
/// The live check and the batch rebuild compare against it differently at
/// exactly the timeout: an idle session is finalized once the gap reaches it
/// ([`IdleTimeout::is_reached`]), while a rebuild only splits events whose
/// gap is strictly longer ([`IdleTimeout::separates`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct IdleTimeout(Duration);

impl IdleTimeout {
    /// The default idle timeout (12 minutes).
    pub const DEFAULT: Self = Self(Duration::minutes(12));

    /// Creates a timeout after validating it is strictly positive.
    pub fn new(duration: Duration) -> Result<Self, ValidationError> {
        if duration <= Duration::zero() {
            return Err(ValidationError::NonPositiveTimeout {
                seconds: duration.num_seconds(),
            });
        }
        Ok(Self(duration))
    }

    /// Creates a timeout from a number of seconds.
    pub fn from_secs(seconds: u64) -> Result<Self, ValidationError> {
        let duration = i64::try_from(seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX);
        Self::new(duration)
    }

    /// Returns the underlying duration.
    #[must_use]
    pub const fn duration(self) -> Duration {
        self.0
    }

    /// Whether a session idle for `idle` is due to be finalized.
    #[must_use]
    pub fn is_reached(self, idle: Duration) -> bool {
        idle >= self.0
    }

    /// Whether a gap between consecutive events splits them into two sessions.
    ///
    /// Also decides whether a rebuilt trailing session is stale: it stays
    /// active while `now - end` does not separate it.
    #[must_use]
    pub fn separates(self, gap: Duration) -> bool {
        gap > self.0
    }
}

impl Default for IdleTimeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for IdleTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.num_seconds();
        if secs % 60 == 0 {
            write!(f, "{}m", secs / 60)
        } else {
            write!(f, "{secs}s")
        }
    }
}

/// Normalizes an instant to the millisecond precision used for storage.
///
/// Applied at every entry point so that stored values, in-memory session
/// bounds and import dedupe keys compare equal.
#[must_use]
pub fn normalize_instant(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant.trunc_subsecs(3)
}
