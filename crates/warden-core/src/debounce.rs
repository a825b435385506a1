//! Recognition debouncer.
//!
//! Turns the noisy per-frame match stream into a low-frequency stream of
//! audit-worthy events. Each enrolled subject has its own cooldown slot and
//! all unrecognized faces share one slot. A face whose slot is cooling down
//! is suppressed and carries the remaining wait for the overlay countdown.
//!
//! The debouncer owns no I/O and never fails: malformed scores classify as
//! unknown, and a clock that runs backwards counts as no time elapsed.

use crate::event::{EventKind, NewEvent, Outcome};
use crate::types::{BoundingBox, FaceMatchResult, SubjectId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default distance at or below which a candidate counts as known.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
pub const DEFAULT_KNOWN_COOLDOWN: Duration = Duration::from_secs(3);
pub const DEFAULT_UNKNOWN_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceConfig {
    /// Maximum match distance for a candidate to count as known.
    pub match_threshold: f32,
    /// Minimum interval between two emitted events for the same subject.
    pub known_cooldown: Duration,
    /// Minimum interval between two emitted unknown-face events.
    pub unknown_cooldown: Duration,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            known_cooldown: DEFAULT_KNOWN_COOLDOWN,
            unknown_cooldown: DEFAULT_UNKNOWN_COOLDOWN,
        }
    }
}

/// Cooldown class of a detected face.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaceClass {
    Known(SubjectId),
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First detection of this class since its cooldown expired.
    Emit,
    /// Same class emitted recently; `remaining` is the wait until it may emit again.
    Suppressed { remaining: Duration },
}

/// Per-face outcome of one [`Debouncer::evaluate`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceDecision {
    pub region: BoundingBox,
    pub class: FaceClass,
    /// Score as recorded in the audit trail; `None` when it was not finite.
    pub match_score: Option<f32>,
    pub verdict: Verdict,
}

impl FaceDecision {
    pub fn is_emit(&self) -> bool {
        self.verdict == Verdict::Emit
    }

    pub fn subject_id(&self) -> Option<&str> {
        match &self.class {
            FaceClass::Known(id) => Some(id),
            FaceClass::Unknown => None,
        }
    }

    /// Audit outcome for this face: known succeeds, unknown fails.
    pub fn outcome(&self) -> Outcome {
        Outcome::from_success(matches!(self.class, FaceClass::Known(_)))
    }

    /// The audit event to append, present only for emitted decisions.
    pub fn to_event(&self) -> Option<NewEvent> {
        self.is_emit().then(|| NewEvent {
            kind: EventKind::RecognitionAttempt,
            subject_id: self.subject_id().map(str::to_owned),
            outcome: self.outcome(),
            match_score: self.match_score,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct CooldownState {
    last_emitted_at: Option<Instant>,
}

impl CooldownState {
    /// Time left before this slot may emit again, or `None` if it may emit now.
    fn remaining(&self, cooldown: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_emitted_at?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed >= cooldown {
            None
        } else {
            Some(cooldown - elapsed)
        }
    }
}

/// Per-session cooldown table. Reset whenever the camera session stops.
#[derive(Debug)]
pub struct Debouncer {
    config: DebounceConfig,
    known: HashMap<SubjectId, CooldownState>,
    unknown: CooldownState,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            known: HashMap::new(),
            unknown: CooldownState::default(),
        }
    }

    /// Known iff a candidate exists and its distance is within the threshold.
    /// NaN, infinite and negative distances never count as a match.
    pub fn classify(&self, face: &FaceMatchResult) -> FaceClass {
        match &face.candidate_subject_id {
            Some(id)
                if is_distance(face.match_score)
                    && face.match_score <= self.config.match_threshold =>
            {
                FaceClass::Known(id.clone())
            }
            _ => FaceClass::Unknown,
        }
    }

    /// Decide, for every face in one frame, whether it is a new reportable
    /// event. Decisions are returned in input order.
    ///
    /// Faces are visited closest-match first (ties by input order), so when
    /// several faces in one frame share a class the emitted one carries the
    /// best score and the rest are suppressed.
    pub fn evaluate(&mut self, faces: &[FaceMatchResult], now: Instant) -> Vec<FaceDecision> {
        let classes: Vec<FaceClass> = faces.iter().map(|f| self.classify(f)).collect();

        let mut order: Vec<usize> = (0..faces.len()).collect();
        order.sort_by(|&a, &b| rank(faces[a].match_score).total_cmp(&rank(faces[b].match_score)));

        let mut verdicts = vec![Verdict::Emit; faces.len()];
        for i in order {
            verdicts[i] = self.decide(&classes[i], now);
        }

        faces
            .iter()
            .zip(classes)
            .zip(verdicts)
            .map(|((face, class), verdict)| {
                tracing::trace!(?class, score = face.match_score, ?verdict, "face decision");
                FaceDecision {
                    region: face.region,
                    class,
                    match_score: face.match_score.is_finite().then_some(face.match_score),
                    verdict,
                }
            })
            .collect()
    }

    /// Remaining wait for a class without evaluating a face.
    pub fn cooldown_remaining(&self, class: &FaceClass, now: Instant) -> Option<Duration> {
        match class {
            FaceClass::Known(id) => self
                .known
                .get(id)
                .and_then(|s| s.remaining(self.config.known_cooldown, now)),
            FaceClass::Unknown => self.unknown.remaining(self.config.unknown_cooldown, now),
        }
    }

    /// Forget all cooldown history. Called at every session boundary.
    pub fn reset(&mut self) {
        tracing::debug!(tracked = self.known.len(), "debouncer reset");
        self.known.clear();
        self.unknown = CooldownState::default();
    }

    fn decide(&mut self, class: &FaceClass, now: Instant) -> Verdict {
        let (slot, cooldown) = match class {
            FaceClass::Known(id) => (
                self.known.entry(id.clone()).or_default(),
                self.config.known_cooldown,
            ),
            FaceClass::Unknown => (&mut self.unknown, self.config.unknown_cooldown),
        };

        match slot.remaining(cooldown, now) {
            Some(remaining) => Verdict::Suppressed { remaining },
            None => {
                slot.last_emitted_at = Some(now);
                Verdict::Emit
            }
        }
    }
}

fn is_distance(score: f32) -> bool {
    score.is_finite() && score >= 0.0
}

/// Visiting order within a frame; malformed scores go last.
fn rank(score: f32) -> f32 {
    if is_distance(score) {
        score
    } else {
        f32::INFINITY
    }
}
