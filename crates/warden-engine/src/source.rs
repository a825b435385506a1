//! Frame source contract.

use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("frame source unavailable: {0}")]
    Unavailable(String),
    #[error("frame source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A frame that knows when it was captured. Cooldowns are measured
/// between capture instants, not processing instants.
pub trait CapturedFrame {
    fn captured_at(&self) -> Instant;
}

/// Camera, video file or recorded trace.
pub trait FrameSource {
    type Frame: CapturedFrame;

    fn start(&mut self) -> Result<(), SourceError>;

    /// Next frame, or `None` when nothing could be read this tick. A
    /// missing frame is skipped, never fatal.
    fn next_frame(&mut self) -> Option<Self::Frame>;

    fn stop(&mut self);
}
