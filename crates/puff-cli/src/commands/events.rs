//! Events command for dumping stored events as JSONL.

use std::io::Write;

use anyhow::Result;
use puff_db::SessionEngine;

pub fn run<W: Write>(writer: &mut W, engine: &SessionEngine, current: bool) -> Result<()> {
    let events = if current {
        engine.current_session_events()?
    } else {
        engine.events()?
    };

    for event in &events {
        writeln!(writer, "{}", serde_json::to_string(event)?)?;
    }
    Ok(())
}
