//! Add command for recording events.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use puff_db::SessionEngine;

use super::util::describe_active;

/// Records `count` events at `at` and prints the resulting session.
pub fn run<W: Write>(
    writer: &mut W,
    engine: &SessionEngine,
    count: u32,
    at: DateTime<Utc>,
) -> Result<()> {
    match engine.append_events_at(count, at)? {
        Some(session) => writeln!(writer, "Session: {}", describe_active(&session))?,
        None => writeln!(writer, "No events recorded.")?,
    }
    Ok(())
}
