//! Rebuild command for recomputing sessions from the event log.

use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use puff_db::SessionEngine;

use super::util::{describe_active, plural};

pub fn run<W: Write>(writer: &mut W, engine: &SessionEngine, now: DateTime<Utc>) -> Result<()> {
    let summary = engine.reconcile_at(now)?;

    writeln!(
        writer,
        "Rebuilt {} finalized {} from {} {}.",
        summary.finalized,
        plural(summary.finalized as u64, "session"),
        summary.events,
        plural(summary.events, "event"),
    )?;
    match summary.active {
        Some(session) => writeln!(writer, "Active session: {}", describe_active(&session))?,
        None => writeln!(writer, "Active session: none")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{at, engine, output};

    use insta::assert_snapshot;

    #[test]
    fn rebuild_reports_summary() {
        let engine = engine();
        for minute in [0, 1, 30, 31] {
            engine.append_event_at(at(minute)).unwrap();
        }

        let mut out = Vec::new();
        run(&mut out, &engine, at(32)).unwrap();
        assert_snapshot!(output(out), @r"
        Rebuilt 1 finalized session from 4 events.
        Active session: 2 events since 2025-01-01T00:30:00Z (last 2025-01-01T00:31:00Z)
        ");
    }

    #[test]
    fn rebuild_finalizes_stale_tail() {
        let engine = engine();
        engine.append_event_at(at(0)).unwrap();

        let mut out = Vec::new();
        run(&mut out, &engine, at(60)).unwrap();
        assert_snapshot!(output(out), @r"
        Rebuilt 1 finalized session from 1 event.
        Active session: none
        ");
        assert!(engine.active_session().unwrap().is_none());
    }
}
