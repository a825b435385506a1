//! Recorded-trace replay for `warden replay`.
//!
//! A trace is JSON lines, one frame per line:
//! `{"t": 1.25, "faces": [...]}` where `t` is seconds since the first
//! frame. A face either carries a precomputed `match_score` (and optional
//! `subject_id`) or a raw `embedding` matched against the gallery.

use serde::Deserialize;
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use warden_core::{BoundingBox, DistanceMatcher, Embedding, FaceMatchResult, FaceMatcher, Template};
use warden_engine::{CapturedFrame, FrameSource, SourceError};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TraceFace {
    Embedded {
        region: BoundingBox,
        embedding: Vec<f32>,
    },
    Scored {
        region: BoundingBox,
        match_score: f32,
        #[serde(default)]
        subject_id: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct TraceLine {
    t: f64,
    #[serde(default)]
    faces: Vec<TraceFace>,
}

#[derive(Debug, Clone)]
pub struct ReplayFrame {
    /// Seconds since the start of the trace.
    pub offset: f64,
    pub faces: Vec<TraceFace>,
    at: Instant,
}

impl CapturedFrame for ReplayFrame {
    fn captured_at(&self) -> Instant {
        self.at
    }
}

/// Frame source reading a trace file. Frames are loaded on `start`.
pub struct ReplaySource {
    path: PathBuf,
    frames: VecDeque<ReplayFrame>,
}

impl ReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frames: VecDeque::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ReplaySource {
    type Frame = ReplayFrame;

    fn start(&mut self) -> Result<(), SourceError> {
        let file = std::fs::File::open(&self.path)?;
        self.frames = parse_trace(std::io::BufReader::new(file), Instant::now())?;
        tracing::info!(path = %self.path.display(), frames = self.frames.len(), "trace loaded");
        Ok(())
    }

    fn next_frame(&mut self) -> Option<ReplayFrame> {
        self.frames.pop_front()
    }

    fn stop(&mut self) {
        self.frames.clear();
    }
}

/// Parse a trace, anchoring offsets at `base`. Blank lines are skipped;
/// offsets must be finite and non-negative.
pub fn parse_trace(reader: impl BufRead, base: Instant) -> Result<VecDeque<ReplayFrame>, SourceError> {
    let mut frames = VecDeque::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let lineno = idx + 1;
        let parsed: TraceLine = serde_json::from_str(&line)
            .map_err(|e| SourceError::Unavailable(format!("trace line {lineno}: {e}")))?;
        let offset = Duration::try_from_secs_f64(parsed.t).map_err(|_| {
            SourceError::Unavailable(format!("trace line {lineno}: invalid time {}", parsed.t))
        })?;
        frames.push_back(ReplayFrame {
            offset: parsed.t,
            faces: parsed.faces,
            at: base + offset,
        });
    }
    Ok(frames)
}

/// Passes scored faces through and matches embedded ones.
#[derive(Debug, Default)]
pub struct TraceMatcher {
    distance: DistanceMatcher,
}

impl FaceMatcher<ReplayFrame> for TraceMatcher {
    fn match_faces(&mut self, frame: &ReplayFrame, templates: &[Template]) -> Vec<FaceMatchResult> {
        frame
            .faces
            .iter()
            .map(|face| match face {
                TraceFace::Scored {
                    region,
                    match_score,
                    subject_id,
                } => FaceMatchResult::new(*region, *match_score, subject_id.as_deref()),
                TraceFace::Embedded { region, embedding } => {
                    self.distance
                        .compare(*region, &Embedding::new(embedding.clone()), templates)
                }
            })
            .collect()
    }
}
