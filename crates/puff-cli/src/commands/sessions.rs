//! Sessions command for listing the active and finalized sessions.

use std::io::Write;

use anyhow::Result;
use puff_core::{ActiveSession, FinalizedSession};
use puff_db::SessionEngine;
use serde::Serialize;

use super::util::{describe_active, describe_finalized};

#[derive(Debug, Serialize)]
struct SessionsOutput {
    active: Option<ActiveSession>,
    finalized: Vec<FinalizedSession>,
}

/// Prints the in-progress session followed by finalized sessions, newest first.
pub fn run<W: Write>(
    writer: &mut W,
    engine: &SessionEngine,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let active = engine.active_session()?;
    let finalized = match limit {
        Some(limit) => engine.latest_finalized_sessions(limit)?,
        None => engine.finalized_sessions()?,
    };

    if json {
        let out = SessionsOutput { active, finalized };
        writeln!(writer, "{}", serde_json::to_string_pretty(&out)?)?;
        return Ok(());
    }

    if active.is_none() && finalized.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    if let Some(session) = active {
        writeln!(writer, "* {}", describe_active(&session))?;
    }
    for session in &finalized {
        writeln!(writer, "  {}", describe_finalized(session))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{at, engine, output};

    use insta::assert_snapshot;

    fn seeded() -> SessionEngine {
        let engine = engine();
        for minute in [0, 1, 30, 31, 32, 60] {
            engine.append_event_at(at(minute)).unwrap();
        }
        engine
    }

    #[test]
    fn lists_active_then_newest_finalized() {
        let engine = seeded();
        let mut out = Vec::new();
        run(&mut out, &engine, None, false).unwrap();

        assert_snapshot!(output(out), @r"
        * 1 event since 2025-01-01T01:00:00Z (last 2025-01-01T01:00:00Z)
          2025-01-01T00:30:00Z .. 2025-01-01T00:32:00Z  3 events
          2025-01-01T00:00:00Z .. 2025-01-01T00:01:00Z  2 events
        ");
    }

    #[test]
    fn limit_caps_finalized_sessions() {
        let engine = seeded();
        let mut out = Vec::new();
        run(&mut out, &engine, Some(1), true).unwrap();

        let value: serde_json::Value = serde_json::from_str(&output(out)).unwrap();
        let finalized = value["finalized"].as_array().unwrap();
        assert_eq!(finalized.len(), 1);
        assert_eq!(finalized[0]["count"], 3);
        assert_eq!(value["active"]["count"], 1);
    }

    #[test]
    fn empty_store() {
        let engine = engine();
        let mut out = Vec::new();
        run(&mut out, &engine, None, false).unwrap();
        assert_eq!(output(out), "No sessions recorded.\n");
    }
}
