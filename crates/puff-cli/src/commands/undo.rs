//! Undo command for removing the latest events of the current session.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use puff_db::SessionEngine;

use super::util::{describe_active, plural};

pub fn run<W: Write>(
    writer: &mut W,
    engine: &SessionEngine,
    count: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let undone = engine.undo_events_at(count, now)?;
    if undone == 0 {
        writeln!(writer, "Nothing to undo.")?;
        return Ok(());
    }

    writeln!(writer, "Undid {undone} {}.", plural(undone, "event"))?;
    match engine.active_session()? {
        Some(session) => writeln!(writer, "Session: {}", describe_active(&session))?,
        None => writeln!(writer, "No session in progress.")?,
    }
    Ok(())
}
