//! Biometric matcher contract and the reference distance matcher.
//!
//! Score convention: every matcher reports a distance, smaller = closer.
//! The debouncer's threshold comparison depends on this direction.

use crate::types::{BoundingBox, Embedding, FaceMatchResult, Template};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strategy for turning one frame into per-face match results against the
/// currently loaded templates.
pub trait FaceMatcher<F> {
    fn match_faces(&mut self, frame: &F, templates: &[Template]) -> Vec<FaceMatchResult>;
}

/// A face located by an upstream detector together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub region: BoundingBox,
    pub embedding: Embedding,
}

/// Euclidean-distance matcher with full gallery traversal.
///
/// Always visits every template so timing does not leak gallery size or
/// match position. Equal distances resolve to the smallest subject id.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceMatcher;

impl DistanceMatcher {
    /// Closest template and its distance. `None` for an empty gallery or
    /// when every distance is NaN.
    pub fn best_match<'a>(
        &self,
        probe: &Embedding,
        templates: &'a [Template],
    ) -> Option<(&'a Template, f32)> {
        let mut best: Option<(&Template, f32)> = None;

        for template in templates {
            let dist = probe.distance(&template.embedding);
            if dist.is_nan() {
                continue;
            }
            let better = match best {
                None => true,
                Some((prev, prev_dist)) => match dist.total_cmp(&prev_dist) {
                    Ordering::Less => true,
                    Ordering::Equal => template.subject_id < prev.subject_id,
                    Ordering::Greater => false,
                },
            };
            if better {
                best = Some((template, dist));
            }
        }

        best
    }

    /// Match one detected face. Without any candidate the score is infinite.
    pub fn compare(
        &self,
        region: BoundingBox,
        probe: &Embedding,
        templates: &[Template],
    ) -> FaceMatchResult {
        match self.best_match(probe, templates) {
            Some((template, dist)) => FaceMatchResult {
                region,
                match_score: dist,
                candidate_subject_id: Some(template.subject_id.clone()),
            },
            None => FaceMatchResult {
                region,
                match_score: f32::INFINITY,
                candidate_subject_id: None,
            },
        }
    }
}

impl<F: AsRef<[DetectedFace]>> FaceMatcher<F> for DistanceMatcher {
    fn match_faces(&mut self, frame: &F, templates: &[Template]) -> Vec<FaceMatchResult> {
        frame
            .as_ref()
            .iter()
            .map(|face| self.compare(face.region, &face.embedding, templates))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: &str, values: Vec<f32>) -> Template {
        Template {
            subject_id: id.into(),
            embedding: Embedding::new(values),
        }
    }

    #[test]
    fn test_visits_every_template() {
        // Best match is the last entry.
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            template("decoy1", vec![0.0, 1.0, 0.0]),
            template("decoy2", vec![0.0, 0.0, 1.0]),
            template("match", vec![0.9, 0.0, 0.0]),
        ];

        let result = DistanceMatcher.compare(BoundingBox::default(), &probe, &gallery);
        assert_eq!(result.candidate_subject_id.as_deref(), Some("match"));
        assert!((result.match_score - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_tie_resolves_to_smallest_subject_id() {
        let probe = Embedding::new(vec![0.0, 0.0]);
        let gallery = vec![
            template("zed", vec![1.0, 0.0]),
            template("amy", vec![0.0, 1.0]),
            template("kim", vec![-1.0, 0.0]),
        ];

        let (best, dist) = DistanceMatcher.best_match(&probe, &gallery).unwrap();
        assert_eq!(best.subject_id, "amy");
        assert!((dist - 1.0).abs() < 1e-6);

        let mut reversed = gallery.clone();
        reversed.reverse();
        let (best, _) = DistanceMatcher.best_match(&probe, &reversed).unwrap();
        assert_eq!(best.subject_id, "amy");
    }

    #[test]
    fn test_empty_gallery_has_no_candidate() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let result = DistanceMatcher.compare(BoundingBox::default(), &probe, &[]);
        assert!(result.candidate_subject_id.is_none());
        assert_eq!(result.match_score, f32::INFINITY);
    }

    #[test]
    fn test_nan_embedding_never_wins() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![
            template("broken", vec![f32::NAN, 0.0]),
            template("far", vec![-1.0, 0.0]),
        ];
        let (best, _) = DistanceMatcher.best_match(&probe, &gallery).unwrap();
        assert_eq!(best.subject_id, "far");
    }

    #[test]
    fn test_match_faces_over_detected_faces() {
        let gallery = vec![template("u1", vec![1.0, 0.0])];
        let frame = vec![
            DetectedFace {
                region: BoundingBox { x: 1.0, y: 2.0, width: 3.0, height: 4.0 },
                embedding: Embedding::new(vec![1.0, 0.0]),
            },
            DetectedFace {
                region: BoundingBox::default(),
                embedding: Embedding::new(vec![0.0, 1.0]),
            },
        ];

        let results = DistanceMatcher.match_faces(&frame, &gallery);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].region.x, 1.0);
        assert!(results[0].match_score.abs() < 1e-6);
        assert_eq!(results[1].candidate_subject_id.as_deref(), Some("u1"));
    }
}
