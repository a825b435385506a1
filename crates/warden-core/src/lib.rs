//! warden-core — Recognition debouncing and the security-event taxonomy.
//!
//! Match results in, per-face decisions and audit events out. Nothing here
//! touches the camera or durable storage: the ledger lives in
//! `warden-ledger` and the frame loop in `warden-engine`.

pub mod debounce;
pub mod event;
pub mod gallery;
pub mod matcher;
pub mod overlay;
pub mod types;

pub use debounce::{DebounceConfig, Debouncer, FaceClass, FaceDecision, Verdict};
pub use event::{AuditEvent, EventId, EventKind, NewEvent, Outcome};
pub use gallery::{Gallery, GalleryError, InMemoryGallery};
pub use matcher::{DetectedFace, DistanceMatcher, FaceMatcher};
pub use overlay::{FaceOverlay, OverlayColor};
pub use types::{BoundingBox, Embedding, FaceMatchResult, SubjectId, SubjectProfile, Template};
