//! Export writers for `warden export`.

use anyhow::Result;
use chrono::SecondsFormat;
use std::io::Write;
use warden_core::AuditEvent;
use warden_ledger::LedgerError;

pub const CSV_HEADER: &str = "timestamp;kind;subject_id;outcome;match_score";

/// Write events as `;`-delimited CSV. Returns the number of rows written.
pub fn write_csv(
    events: impl Iterator<Item = Result<AuditEvent, LedgerError>>,
    out: &mut impl Write,
) -> Result<u64> {
    writeln!(out, "{CSV_HEADER}")?;
    let mut rows = 0;
    for event in events {
        let event = event?;
        let score = event
            .match_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_default();
        writeln!(
            out,
            "{};{};{};{};{}",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            event.kind,
            csv_field(event.subject_id.as_deref().unwrap_or("")),
            event.outcome,
            score,
        )?;
        rows += 1;
    }
    Ok(rows)
}

/// Write events as one JSON object per line.
pub fn write_jsonl(
    events: impl Iterator<Item = Result<AuditEvent, LedgerError>>,
    out: &mut impl Write,
) -> Result<u64> {
    let mut rows = 0;
    for event in events {
        serde_json::to_writer(&mut *out, &event?)?;
        writeln!(out)?;
        rows += 1;
    }
    Ok(rows)
}

/// Quote a free-text field if it contains the delimiter, a quote or a newline.
fn csv_field(value: &str) -> String {
    if value.contains([';', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
