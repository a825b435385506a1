//! warden-engine — The frame-processing session and its capture thread.
//!
//! A [`Session`] turns frames into debounced audit events and overlays.
//! [`spawn_session`] runs one on a dedicated OS thread driven through a
//! cloneable [`SessionHandle`].

pub mod config;
pub mod engine;
pub mod session;
pub mod source;

pub use config::Config;
pub use engine::{spawn_session, EngineError, SessionHandle};
pub use session::{FrameReport, Session, SessionStatus, LEDGER_DEGRADED_AFTER};
pub use source::{CapturedFrame, FrameSource, SourceError};
