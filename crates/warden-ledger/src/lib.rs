//! warden-ledger — Append-only audit ledger for security events.
//!
//! The [`AuditLedger`] trait is the only write path for recognition,
//! user-management and lifecycle events, and the read surface for
//! statistics and compliance export.

pub mod ledger;
pub mod sqlite;

pub use ledger::{
    AuditLedger, EventStream, KindOutcomeCount, LedgerError, SubjectSummary, WindowSummary,
    RECENT_PAGE_SIZE,
};
pub use sqlite::SqliteLedger;
