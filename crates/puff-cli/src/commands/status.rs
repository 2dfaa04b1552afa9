//! Status command for showing the current session and store totals.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use puff_db::SessionEngine;

use super::util::describe_active;

pub fn run<W: Write>(
    writer: &mut W,
    engine: &SessionEngine,
    database_path: &Path,
    json: bool,
) -> Result<()> {
    let snapshot = engine.snapshot()?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&snapshot)?)?;
        return Ok(());
    }

    writeln!(writer, "Puff tracker status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(writer, "Idle timeout: {}", engine.timeout())?;
    writeln!(writer, "Events: {}", snapshot.events)?;
    writeln!(writer, "Finalized sessions: {}", snapshot.finalized_sessions)?;
    match snapshot.state.active() {
        Some(session) => writeln!(writer, "Active session: {}", describe_active(session))?,
        None => writeln!(writer, "Active session: none")?,
    }
    Ok(())
}
