use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable identifier of an enrolled subject.
pub type SubjectId = String;

/// Bounding box for a detected face, in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Face embedding vector produced by the biometric matcher's recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance between two embeddings. Lower = more similar.
    ///
    /// Embeddings of different length are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// One enrolled biometric template, as handed to the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub subject_id: SubjectId,
    pub embedding: Embedding,
}

/// Profile data for an enrolled subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: SubjectId,
    pub display_name: String,
    #[serde(default)]
    pub photo_path: Option<PathBuf>,
}

/// Per-frame, per-face output of the biometric matcher.
///
/// `match_score` is a distance: smaller is more similar. Matchers that
/// natively report a confidence must convert before handing results over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatchResult {
    pub region: BoundingBox,
    pub match_score: f32,
    pub candidate_subject_id: Option<SubjectId>,
}

impl FaceMatchResult {
    pub fn new(region: BoundingBox, match_score: f32, candidate: Option<&str>) -> Self {
        Self {
            region,
            match_score,
            candidate_subject_id: candidate.map(str::to_owned),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.5, 0.1, -0.2]);
        assert!(a.distance(&a).abs() < 1e-6);
    }

    #[test]
    fn test_distance_unit_axes() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_distance_length_mismatch_is_infinite() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.distance(&b), f32::INFINITY);
    }
}
