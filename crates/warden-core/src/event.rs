//! Audit event taxonomy shared by the debouncer, the ledger and its callers.

use crate::types::SubjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Surrogate key assigned by the ledger on insert. Monotonic per ledger.
pub type EventId = i64;

/// Closed set of security-relevant event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RecognitionAttempt,
    UserEnrolled,
    UserRemoved,
    UserPhotoUpdated,
    CameraStarted,
    CameraStopped,
    TemplatesReloaded,
}

impl EventKind {
    pub const ALL: [EventKind; 7] = [
        EventKind::RecognitionAttempt,
        EventKind::UserEnrolled,
        EventKind::UserRemoved,
        EventKind::UserPhotoUpdated,
        EventKind::CameraStarted,
        EventKind::CameraStopped,
        EventKind::TemplatesReloaded,
    ];

    /// Stable storage / wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::RecognitionAttempt => "recognition_attempt",
            EventKind::UserEnrolled => "user_enrolled",
            EventKind::UserRemoved => "user_removed",
            EventKind::UserPhotoUpdated => "user_photo_updated",
            EventKind::CameraStarted => "camera_started",
            EventKind::CameraStopped => "camera_stopped",
            EventKind::TemplatesReloaded => "templates_reloaded",
        }
    }

    /// Whether events of this kind concern a specific subject.
    pub fn is_user_management(self) -> bool {
        matches!(
            self,
            EventKind::UserEnrolled | EventKind::UserRemoved | EventKind::UserPhotoUpdated
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value:?}")]
pub struct ParseTaxonomyError {
    what: &'static str,
    value: String,
}

impl FromStr for EventKind {
    type Err = ParseTaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseTaxonomyError {
                what: "event kind",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }

    pub fn from_success(success: bool) -> Self {
        if success {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = ParseTaxonomyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            other => Err(ParseTaxonomyError {
                what: "outcome",
                value: other.to_string(),
            }),
        }
    }
}

/// An event as submitted to the ledger. `id` and `timestamp` are assigned
/// by the ledger, never by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub kind: EventKind,
    pub subject_id: Option<SubjectId>,
    pub outcome: Outcome,
    pub match_score: Option<f32>,
}

impl NewEvent {
    /// A recognition attempt. Known faces succeed, unknown faces fail.
    /// Non-finite scores are not recorded.
    pub fn recognition(subject_id: Option<&str>, match_score: f32) -> Self {
        Self {
            kind: EventKind::RecognitionAttempt,
            subject_id: subject_id.map(str::to_owned),
            outcome: Outcome::from_success(subject_id.is_some()),
            match_score: match_score.is_finite().then_some(match_score),
        }
    }

    pub fn user_enrolled(subject_id: &str, outcome: Outcome) -> Self {
        Self::user(EventKind::UserEnrolled, subject_id, outcome)
    }

    pub fn user_removed(subject_id: &str, outcome: Outcome) -> Self {
        Self::user(EventKind::UserRemoved, subject_id, outcome)
    }

    pub fn user_photo_updated(subject_id: &str, outcome: Outcome) -> Self {
        Self::user(EventKind::UserPhotoUpdated, subject_id, outcome)
    }

    /// Lifecycle event with no subject (camera start/stop, template reload).
    pub fn system(kind: EventKind, outcome: Outcome) -> Self {
        Self {
            kind,
            subject_id: None,
            outcome,
            match_score: None,
        }
    }

    fn user(kind: EventKind, subject_id: &str, outcome: Outcome) -> Self {
        Self {
            kind,
            subject_id: Some(subject_id.to_string()),
            outcome,
            match_score: None,
        }
    }
}

/// A persisted, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub subject_id: Option<SubjectId>,
    pub outcome: Outcome,
    pub match_score: Option<f32>,
}
