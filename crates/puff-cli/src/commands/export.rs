//! Export command for writing every stored event timestamp.

use std::io::Write;

use anyhow::Result;
use puff_core::write_export;
use puff_db::SessionEngine;

/// Writes all event timestamps, ascending. Returns the number written.
pub fn run<W: Write>(writer: &mut W, engine: &SessionEngine) -> Result<usize> {
    let events = engine.events()?;
    write_export(writer, events.iter().map(|event| event.timestamp))?;
    writer.flush()?;
    Ok(events.len())
}
