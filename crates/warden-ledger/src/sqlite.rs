//! SQLite-backed audit ledger.
//!
//! One append-only table, indexed by timestamp, kind and subject. Update
//! and delete are rejected by triggers, so the trail stays immutable even
//! for code holding a raw connection.
//!
//! Timestamps are UTC RFC 3339 with fixed microsecond precision, which makes
//! text order equal time order. Each new timestamp is clamped to be no
//! earlier than the previous one, so ledger order never runs backwards even
//! when the wall clock does; ties are broken by id.

use crate::ledger::{
    AuditLedger, EventStream, KindOutcomeCount, LedgerError, SubjectSummary, WindowSummary,
    RECENT_PAGE_SIZE,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use warden_core::{AuditEvent, EventId, EventKind, NewEvent, Outcome};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS audit_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        kind TEXT NOT NULL,
        subject_id TEXT,
        outcome TEXT NOT NULL,
        match_score REAL
    );
    CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_audit_events_kind ON audit_events(kind);
    CREATE INDEX IF NOT EXISTS idx_audit_events_subject_id ON audit_events(subject_id);
    CREATE TRIGGER IF NOT EXISTS audit_events_no_update
        BEFORE UPDATE ON audit_events
        BEGIN SELECT RAISE(ABORT, 'audit_events is append-only'); END;
    CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
        BEFORE DELETE ON audit_events
        BEGIN SELECT RAISE(ABORT, 'audit_events is append-only'); END;
";

/// Rows fetched per round trip while exporting.
const EXPORT_BATCH_SIZE: usize = 256;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

struct Inner {
    conn: Connection,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Audit ledger over a single SQLite connection.
///
/// All access is serialized through one mutex, which gives the single-writer
/// discipline appends need and lets queries run from other threads.
pub struct SqliteLedger {
    inner: Mutex<Inner>,
    clock: Clock,
}

impl SqliteLedger {
    /// Open (or create) a file-backed ledger with WAL journaling and full
    /// fsync on commit. The parent directory must exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let open_err = |source| LedgerError::Open {
            path: path.display().to_string(),
            source,
        };

        let conn = Connection::open(path).map_err(open_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(open_err)?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(open_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(open_err)?;

        let ledger = Self::from_connection(conn)?;
        tracing::info!(path = %path.display(), journal_mode = %journal_mode, "audit ledger opened");
        Ok(ledger)
    }

    /// Volatile ledger, used for dry runs and tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(|source| LedgerError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Replace the wall clock used to stamp events and resolve windows.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Total number of stored events.
    pub fn event_count(&self) -> Result<u64, LedgerError> {
        let inner = self.lock()?;
        let n: i64 = inner
            .conn
            .query_row("SELECT COUNT(*) FROM audit_events", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    fn from_connection(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;

        let last_timestamp = conn.query_row(
            "SELECT MAX(timestamp) FROM audit_events",
            [],
            |row| match row.get::<_, Option<String>>(0)? {
                Some(_) => parse_text(row, 0, parse_timestamp).map(Some),
                None => Ok(None),
            },
        )?;

        Ok(Self {
            inner: Mutex::new(Inner {
                conn,
                last_timestamp,
            }),
            clock: Box::new(Utc::now),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LedgerError> {
        self.inner.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Lower bound of a trailing window, or `None` if it reaches before
    /// the representable range (no lower bound).
    fn window_start(&self, since: Duration) -> Option<String> {
        let now = (self.clock)();
        chrono::Duration::from_std(since)
            .ok()
            .and_then(|d| now.checked_sub_signed(d))
            .map(format_timestamp)
    }
}

impl AuditLedger for SqliteLedger {
    fn append(&self, event: &NewEvent) -> Result<EventId, LedgerError> {
        let mut inner = self.lock()?;

        let now = (self.clock)().trunc_subsecs(6);
        let timestamp = match inner.last_timestamp {
            Some(last) if last > now => {
                tracing::warn!(%last, %now, "wall clock behind ledger; reusing last timestamp");
                last
            }
            _ => now,
        };

        inner.conn.execute(
            "INSERT INTO audit_events (timestamp, kind, subject_id, outcome, match_score)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_timestamp(timestamp),
                event.kind.as_str(),
                event.subject_id,
                event.outcome.as_str(),
                event.match_score.map(f64::from),
            ],
        )?;
        let id = inner.conn.last_insert_rowid();
        inner.last_timestamp = Some(timestamp);

        tracing::debug!(
            id,
            kind = %event.kind,
            outcome = %event.outcome,
            subject = event.subject_id.as_deref().unwrap_or("-"),
            "audit event appended"
        );
        Ok(id)
    }

    fn query_window(&self, since: Duration) -> Result<WindowSummary, LedgerError> {
        let lower = self.window_start(since);
        let inner = self.lock()?;
        // Both reads see the same snapshot.
        let tx = inner.conn.unchecked_transaction()?;
        let counts = window_counts(&tx, lower.as_deref())?;
        let recent = window_recent(&tx, lower.as_deref())?;
        tx.commit()?;
        Ok(WindowSummary { counts, recent })
    }

    fn export_range(&self, since: Duration) -> Result<EventStream<'_>, LedgerError> {
        let since = self.window_start(since);
        let upper_id: EventId = self.lock()?.conn.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM audit_events",
            [],
            |r| r.get(0),
        )?;
        tracing::debug!(upper_id, "export snapshot taken");

        Ok(Box::new(ExportIter {
            ledger: self,
            since,
            upper_id,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn subject_summary(
        &self,
        subject_id: &str,
        since: Duration,
    ) -> Result<SubjectSummary, LedgerError> {
        let lower = self.window_start(since);
        let inner = self.lock()?;
        let mut stmt = inner.conn.prepare_cached(
            "SELECT kind, COUNT(*), MAX(timestamp), AVG(match_score)
             FROM audit_events
             WHERE subject_id = ?1 AND (?2 IS NULL OR timestamp >= ?2)
             GROUP BY kind",
        )?;

        let mut summary = SubjectSummary {
            subject_id: subject_id.to_string(),
            recognitions: 0,
            last_recognized: None,
            avg_match_score: None,
            management_events: 0,
        };

        let rows = stmt.query_map(params![subject_id, lower], |row| {
            let kind = parse_text(row, 0, |s| s.parse::<EventKind>())?;
            let count = row.get::<_, i64>(1)? as u64;
            let last = parse_text(row, 2, parse_timestamp)?;
            let avg: Option<f64> = row.get(3)?;
            Ok((kind, count, last, avg))
        })?;
        for row in rows {
            let (kind, count, last, avg) = row?;
            if kind == EventKind::RecognitionAttempt {
                summary.recognitions = count;
                summary.last_recognized = Some(last);
                summary.avg_match_score = avg;
            } else if kind.is_user_management() {
                summary.management_events += count;
            }
        }

        Ok(summary)
    }
}

/// Keyset-paginated export. Holds the connection lock only while a batch
/// is being read, so appends proceed between batches.
struct ExportIter<'a> {
    ledger: &'a SqliteLedger,
    since: Option<String>,
    upper_id: EventId,
    cursor: Option<(String, EventId)>,
    buffer: VecDeque<AuditEvent>,
    exhausted: bool,
}

impl ExportIter<'_> {
    fn fetch_batch(&mut self) -> Result<(), LedgerError> {
        let ledger = self.ledger;
        let inner = ledger.lock()?;
        let mut stmt = inner.conn.prepare_cached(
            "SELECT id, timestamp, kind, subject_id, outcome, match_score
             FROM audit_events
             WHERE id <= ?1
               AND (?2 IS NULL OR timestamp >= ?2)
               AND (?3 IS NULL OR (timestamp, id) > (?3, ?4))
             ORDER BY timestamp, id
             LIMIT ?5",
        )?;

        let (cursor_ts, cursor_id) = match &self.cursor {
            Some((ts, id)) => (Some(ts.as_str()), Some(*id)),
            None => (None, None),
        };
        let batch = stmt
            .query_map(
                params![
                    self.upper_id,
                    self.since,
                    cursor_ts,
                    cursor_id,
                    EXPORT_BATCH_SIZE as i64
                ],
                event_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        if batch.len() < EXPORT_BATCH_SIZE {
            self.exhausted = true;
        }
        if let Some(last) = batch.last() {
            self.cursor = Some((format_timestamp(last.timestamp), last.id));
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for ExportIter<'_> {
    type Item = Result<AuditEvent, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_batch() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn window_counts(conn: &Connection, lower: Option<&str>) -> rusqlite::Result<Vec<KindOutcomeCount>> {
    let mut stmt = conn.prepare_cached(
        "SELECT kind, outcome, COUNT(*), AVG(match_score)
         FROM audit_events
         WHERE (?1 IS NULL OR timestamp >= ?1)
         GROUP BY kind, outcome
         ORDER BY COUNT(*) DESC, kind, outcome",
    )?;
    let rows = stmt.query_map(params![lower], |row| {
        Ok(KindOutcomeCount {
            kind: parse_text(row, 0, |s| s.parse::<EventKind>())?,
            outcome: parse_text(row, 1, |s| s.parse::<Outcome>())?,
            count: row.get::<_, i64>(2)? as u64,
            avg_match_score: row.get(3)?,
        })
    })?;
    rows.collect()
}

fn window_recent(conn: &Connection, lower: Option<&str>) -> rusqlite::Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, timestamp, kind, subject_id, outcome, match_score
         FROM audit_events
         WHERE (?1 IS NULL OR timestamp >= ?1)
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![lower, RECENT_PAGE_SIZE as i64], event_from_row)?;
    rows.collect()
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|t| t.with_timezone(&Utc))
}

/// Read a text column and parse it, reporting failures as conversion errors.
fn parse_text<T, E>(
    row: &Row<'_>,
    idx: usize,
    parse: impl FnOnce(&str) -> Result<T, E>,
) -> rusqlite::Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    parse(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    Ok(AuditEvent {
        id: row.get(0)?,
        timestamp: parse_text(row, 1, parse_timestamp)?,
        kind: parse_text(row, 2, |s| s.parse::<EventKind>())?,
        subject_id: row.get(3)?,
        outcome: parse_text(row, 4, |s| s.parse::<Outcome>())?,
        match_score: row.get::<_, Option<f64>>(5)?.map(|s| s as f32),
    })
}
