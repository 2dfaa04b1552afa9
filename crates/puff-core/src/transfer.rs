//! Line-oriented timestamp import/export format.
//!
//! Export writes a `timestamp` header followed by one ISO-8601 UTC instant per
//! line. Import accepts any text: every line that is not a well-formed
//! instant (the header, blanks, garbage) is skipped.

use std::io::{self, BufRead, Write};
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::types::normalize_instant;

/// Header line written at the top of every export.
pub const EXPORT_HEADER: &str = "timestamp";

/// Cheap shape check applied before full RFC 3339 parsing.
static INSTANT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T[0-9:.+\-Z]+$").unwrap());

/// Instants recovered from an import source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportBatch {
    /// Parsed instants, ascending, duplicates retained.
    pub instants: Vec<DateTime<Utc>>,
    /// Number of lines read.
    pub lines_read: usize,
    /// Number of lines that did not hold an instant.
    pub skipped: usize,
}

/// Parses one line into an instant, or `None` if it does not hold one.
pub fn parse_instant_line(line: &str) -> Option<DateTime<Utc>> {
    let line = line.trim();
    if !INSTANT_LINE_RE.is_match(line) {
        return None;
    }
    match DateTime::parse_from_rfc3339(line) {
        Ok(parsed) => Some(normalize_instant(parsed.with_timezone(&Utc))),
        Err(e) => {
            tracing::trace!(error = %e, line, "skipping unparseable instant");
            None
        }
    }
}

/// Reads every instant from an import source.
///
/// Input order does not matter; the returned instants are sorted ascending.
/// Lines that are not valid UTF-8 are skipped like any other non-instant
/// line; only a failing reader is an error.
pub fn parse_import<R: BufRead>(mut reader: R) -> io::Result<ImportBatch> {
    let mut batch = ImportBatch::default();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        batch.lines_read += 1;
        match parse_instant_line(&String::from_utf8_lossy(&buf)) {
            Some(instant) => batch.instants.push(instant),
            None => batch.skipped += 1,
        }
    }
    batch.instants.sort_unstable();
    Ok(batch)
}

/// Formats an instant the way exports write it.
///
/// Fractional seconds are printed only when non-zero, e.g.
/// `2025-09-24T16:05:30.123Z` or `2025-09-24T16:05:30Z`.
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Writes an export: header line, then one instant per line.
pub fn write_export<W, I>(writer: &mut W, instants: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = DateTime<Utc>>,
{
    writeln!(writer, "{EXPORT_HEADER}")?;
    for instant in instants {
        writeln!(writer, "{}", format_instant(instant))?;
    }
    Ok(())
}
