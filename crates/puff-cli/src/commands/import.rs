//! Import command for merging timestamps from a file or stdin.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use puff_core::parse_import;
use puff_db::SessionEngine;

use super::util::plural;

/// Merges every instant read from `reader` and reports what changed.
///
/// Returns the number of events inserted.
pub fn run<W: Write, R: BufRead>(
    writer: &mut W,
    engine: &SessionEngine,
    reader: R,
    now: DateTime<Utc>,
) -> Result<usize> {
    let batch = parse_import(reader).context("failed to read import source")?;
    let found = batch.instants.len();
    let inserted = engine.merge_import_at(&batch.instants, now)?;

    writeln!(
        writer,
        "Imported {inserted} new {} ({found} found, {} skipped).",
        plural(inserted as u64, "event"),
        batch.skipped,
    )?;
    Ok(inserted)
}
