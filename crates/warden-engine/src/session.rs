//! One camera session: match, debounce, audit, annotate.
//!
//! The session owns the debouncer and the loaded templates. A failed audit
//! write is logged and counted but never stops frame processing; after
//! [`LEDGER_DEGRADED_AFTER`] consecutive failures the status reports the
//! ledger as degraded so an operator can be alerted.

use crate::source::{CapturedFrame, SourceError};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;
use warden_core::{
    DebounceConfig, Debouncer, EventId, EventKind, FaceDecision, FaceMatcher, FaceOverlay,
    Gallery, NewEvent, Outcome, Template,
};
use warden_ledger::AuditLedger;

/// Consecutive audit-write failures after which the ledger counts as degraded.
pub const LEDGER_DEGRADED_AFTER: u32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStatus {
    pub running: bool,
    /// Identifier of the current (or last) camera session.
    pub session_id: Option<String>,
    pub templates_loaded: usize,
    pub frames_processed: u64,
    /// Recognition events that passed the debouncer.
    pub events_emitted: u64,
    pub ledger_failures: u64,
    pub consecutive_ledger_failures: u32,
    pub last_ledger_error: Option<String>,
}

impl SessionStatus {
    pub fn ledger_degraded(&self) -> bool {
        self.consecutive_ledger_failures >= LEDGER_DEGRADED_AFTER
    }
}

/// What one processed frame produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub decisions: Vec<FaceDecision>,
    /// One overlay per decision, in the same order.
    pub overlays: Vec<FaceOverlay>,
    /// Ids of the recognition events appended for this frame.
    pub appended: Vec<EventId>,
    /// Emitted events that could not be written.
    pub ledger_failures: usize,
}

pub struct Session<M, G> {
    debouncer: Debouncer,
    matcher: M,
    gallery: G,
    ledger: Arc<dyn AuditLedger>,
    templates: Vec<Template>,
    session_id: Option<Uuid>,
    status: SessionStatus,
}

impl<M, G: Gallery> Session<M, G> {
    pub fn new(config: DebounceConfig, matcher: M, gallery: G, ledger: Arc<dyn AuditLedger>) -> Self {
        Self {
            debouncer: Debouncer::new(config),
            matcher,
            gallery,
            ledger,
            templates: Vec::new(),
            session_id: None,
            status: SessionStatus::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status.running
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    /// Begin a session with fresh cooldowns and freshly loaded templates.
    /// The frame source must already be started.
    pub fn start(&mut self) {
        if self.status.running {
            return;
        }
        let id = Uuid::new_v4();
        self.session_id = Some(id);
        self.debouncer.reset();
        self.status.running = true;
        self.status.session_id = Some(id.to_string());
        tracing::info!(session = %id, "camera session started");

        self.record(&NewEvent::system(EventKind::CameraStarted, Outcome::Success));
        self.reload_templates();
    }

    /// Record that the frame source refused to start.
    pub fn record_start_failure(&mut self, error: &SourceError) {
        tracing::error!(error = %error, "frame source failed to start");
        self.record(&NewEvent::system(EventKind::CameraStarted, Outcome::Failure));
    }

    /// End the session. Cooldowns are cleared before the stop is recorded,
    /// so a later session starts with every slot able to emit.
    pub fn stop(&mut self) {
        if !self.status.running {
            return;
        }
        self.status.running = false;
        self.debouncer.reset();
        self.record(&NewEvent::system(EventKind::CameraStopped, Outcome::Success));
        tracing::info!(
            session = ?self.session_id,
            frames = self.status.frames_processed,
            emitted = self.status.events_emitted,
            "camera session stopped"
        );
    }

    /// Re-read templates from the gallery. Returns the number loaded.
    pub fn reload_templates(&mut self) -> usize {
        self.templates = self.gallery.reload();
        self.status.templates_loaded = self.templates.len();
        tracing::info!(count = self.templates.len(), "templates reloaded");
        self.record(&NewEvent::system(EventKind::TemplatesReloaded, Outcome::Success));
        self.templates.len()
    }

    /// Match, debounce and audit one frame. Frames arriving while the
    /// session is stopped produce an empty report.
    pub fn process<F>(&mut self, frame: &F) -> FrameReport
    where
        F: CapturedFrame,
        M: FaceMatcher<F>,
    {
        let mut report = FrameReport::default();
        if !self.status.running {
            tracing::debug!("frame dropped: session not running");
            return report;
        }

        let faces = self.matcher.match_faces(frame, &self.templates);
        let decisions = self.debouncer.evaluate(&faces, frame.captured_at());
        self.status.frames_processed += 1;

        for decision in &decisions {
            let mut display_name = None;
            if let Some(event) = decision.to_event() {
                self.status.events_emitted += 1;
                match self.record(&event) {
                    Some(id) => report.appended.push(id),
                    None => report.ledger_failures += 1,
                }
                display_name = decision
                    .subject_id()
                    .and_then(|id| self.gallery.lookup(id))
                    .map(|p| p.display_name);
            }
            report
                .overlays
                .push(FaceOverlay::for_decision(decision, display_name.as_deref()));
        }

        report.decisions = decisions;
        report
    }

    /// Append an event; a failure is logged and counted, never propagated.
    fn record(&mut self, event: &NewEvent) -> Option<EventId> {
        match self.ledger.append(event) {
            Ok(id) => {
                self.status.consecutive_ledger_failures = 0;
                Some(id)
            }
            Err(e) => {
                self.status.ledger_failures += 1;
                self.status.consecutive_ledger_failures += 1;
                self.status.last_ledger_error = Some(e.to_string());
                tracing::warn!(error = %e, kind = %event.kind, "audit write failed; continuing");
                if self.status.consecutive_ledger_failures == LEDGER_DEGRADED_AFTER {
                    tracing::error!(
                        failures = LEDGER_DEGRADED_AFTER,
                        "audit ledger degraded: consecutive writes failing"
                    );
                }
                None
            }
        }
    }
}
