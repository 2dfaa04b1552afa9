//! End and finalize commands for closing the current session.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use puff_db::SessionEngine;

use super::util::describe_finalized;

/// Ends the current session immediately.
pub fn run<W: Write>(writer: &mut W, engine: &SessionEngine, now: DateTime<Utc>) -> Result<()> {
    match engine.end_session_now_at(now)? {
        Some(session) => writeln!(writer, "Ended session: {}", describe_finalized(&session))?,
        None => writeln!(writer, "No session in progress.")?,
    }
    Ok(())
}

/// Finalizes the current session only if it has idled past the timeout.
pub fn finalize<W: Write>(
    writer: &mut W,
    engine: &SessionEngine,
    now: DateTime<Utc>,
) -> Result<()> {
    match engine.finalize_if_timed_out_at(now)? {
        Some(session) => writeln!(
            writer,
            "Finalized idle session: {}",
            describe_finalized(&session)
        )?,
        None => writeln!(writer, "No idle session to finalize.")?,
    }
    Ok(())
}
