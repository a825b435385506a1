use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use warden_core::{AuditEvent, EventId, EventKind, NewEvent, Outcome};

/// Number of events returned in [`WindowSummary::recent`].
pub const RECENT_PAGE_SIZE: usize = 50;

/// Durable storage failure. The ledger never swallows one.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cannot open ledger at {path}: {source}")]
    Open {
        path: String,
        source: rusqlite::Error,
    },
    #[error("ledger storage error: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("ledger connection lock poisoned")]
    LockPoisoned,
}

/// One aggregate row: events grouped by kind and outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindOutcomeCount {
    pub kind: EventKind,
    pub outcome: Outcome,
    pub count: u64,
    /// Mean match score of the group; `None` when no event carried one.
    pub avg_match_score: Option<f64>,
}

/// Statistics over a trailing time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    /// Ordered by count descending, then kind, then outcome.
    pub counts: Vec<KindOutcomeCount>,
    /// Newest first, at most [`RECENT_PAGE_SIZE`] entries.
    pub recent: Vec<AuditEvent>,
}

impl WindowSummary {
    pub fn count(&self, kind: EventKind, outcome: Outcome) -> u64 {
        self.counts
            .iter()
            .find(|c| c.kind == kind && c.outcome == outcome)
            .map_or(0, |c| c.count)
    }
}

/// Activity of one subject over a trailing time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectSummary {
    pub subject_id: String,
    pub recognitions: u64,
    pub last_recognized: Option<DateTime<Utc>>,
    pub avg_match_score: Option<f64>,
    /// Enrollment, removal and photo-update events.
    pub management_events: u64,
}

/// Lazy, oldest-first sequence of events.
pub type EventStream<'a> = Box<dyn Iterator<Item = Result<AuditEvent, LedgerError>> + 'a>;

/// Append-only audit trail. Events are never updated or deleted.
pub trait AuditLedger: Send + Sync {
    /// Assign id and timestamp, persist, and return the id. The event is
    /// durable once this returns `Ok`.
    fn append(&self, event: &NewEvent) -> Result<EventId, LedgerError>;

    /// Aggregates and the most recent page of events appended within `since`.
    fn query_window(&self, since: Duration) -> Result<WindowSummary, LedgerError>;

    /// Every event within `since`, ascending by timestamp then id. Events
    /// appended after the call are not included.
    fn export_range(&self, since: Duration) -> Result<EventStream<'_>, LedgerError>;

    fn subject_summary(&self, subject_id: &str, since: Duration)
        -> Result<SubjectSummary, LedgerError>;
}
