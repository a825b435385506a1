//! Overlay label and colour for each face decision.

use crate::debounce::{FaceClass, FaceDecision, Verdict};
use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayColor {
    /// Known face, event emitted.
    Green,
    /// Unknown face, event emitted.
    Red,
    /// Cooling down.
    Yellow,
}

impl OverlayColor {
    /// BGR triple, as drawn by OpenCV-style renderers.
    pub fn bgr(self) -> (u8, u8, u8) {
        match self {
            OverlayColor::Green => (0, 255, 0),
            OverlayColor::Red => (0, 0, 255),
            OverlayColor::Yellow => (0, 255, 255),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceOverlay {
    pub region: BoundingBox,
    pub label: String,
    pub color: OverlayColor,
}

impl FaceOverlay {
    /// Build the overlay for one decision. `display_name` is the gallery
    /// profile name for known faces; the subject id is shown without one.
    pub fn for_decision(decision: &FaceDecision, display_name: Option<&str>) -> Self {
        let (label, color) = match (&decision.class, decision.verdict) {
            (FaceClass::Known(id), Verdict::Emit) => {
                (display_name.unwrap_or(id.as_str()).to_string(), OverlayColor::Green)
            }
            (FaceClass::Unknown, Verdict::Emit) => (String::new(), OverlayColor::Red),
            (_, Verdict::Suppressed { remaining }) => (
                format!("{:.1}s", remaining.as_secs_f64()),
                OverlayColor::Yellow,
            ),
        };

        Self {
            region: decision.region,
            label,
            color,
        }
    }
}
