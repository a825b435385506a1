//! Template gallery / user directory contract.

use crate::types::{Embedding, SubjectProfile, Template};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid gallery file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot encode gallery for {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Maps subject identifiers to profiles and enrolled templates.
///
/// A miss in `lookup` is not an error; the subject simply has no profile.
pub trait Gallery {
    fn lookup(&self, subject_id: &str) -> Option<SubjectProfile>;

    /// Current full set of templates, re-read after enrollment changes.
    fn reload(&mut self) -> Vec<Template>;
}

#[derive(Debug, Clone)]
struct Enrollment {
    profile: SubjectProfile,
    embedding: Embedding,
}

/// One record of a gallery JSON file.
#[derive(Debug, Serialize, Deserialize)]
struct GalleryRecord {
    subject_id: String,
    display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    photo_path: Option<PathBuf>,
    embedding: Vec<f32>,
}

/// Gallery held in memory, ordered by subject id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGallery {
    subjects: BTreeMap<String, Enrollment>,
}

impl InMemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of `{subject_id, display_name, photo_path?, embedding}`.
    pub fn from_json_file(path: &Path) -> Result<Self, GalleryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<GalleryRecord> =
            serde_json::from_str(&raw).map_err(|source| GalleryError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut gallery = Self::new();
        for r in records {
            let profile = SubjectProfile {
                subject_id: r.subject_id,
                display_name: r.display_name,
                photo_path: r.photo_path,
            };
            if !gallery.enroll(profile, Embedding::new(r.embedding)) {
                tracing::warn!(path = %path.display(), "duplicate subject in gallery file; first entry kept");
            }
        }
        tracing::info!(path = %path.display(), subjects = gallery.len(), "gallery loaded");
        Ok(gallery)
    }

    /// Write the gallery in the format read by [`Self::from_json_file`].
    pub fn save_json_file(&self, path: &Path) -> Result<(), GalleryError> {
        let records: Vec<GalleryRecord> = self
            .subjects
            .values()
            .map(|e| GalleryRecord {
                subject_id: e.profile.subject_id.clone(),
                display_name: e.profile.display_name.clone(),
                photo_path: e.profile.photo_path.clone(),
                embedding: e.embedding.values.clone(),
            })
            .collect();
        let json = serde_json::to_string_pretty(&records).map_err(|source| GalleryError::Encode {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Enroll a new subject. Returns `false` if the id is already enrolled.
    pub fn enroll(&mut self, profile: SubjectProfile, embedding: Embedding) -> bool {
        if self.subjects.contains_key(&profile.subject_id) {
            return false;
        }
        self.subjects.insert(
            profile.subject_id.clone(),
            Enrollment { profile, embedding },
        );
        true
    }

    /// Remove a subject. Returns `false` if it was not enrolled.
    pub fn remove(&mut self, subject_id: &str) -> bool {
        self.subjects.remove(subject_id).is_some()
    }

    /// Replace a subject's photo. Returns `false` if it was not enrolled.
    pub fn update_photo(&mut self, subject_id: &str, photo_path: PathBuf) -> bool {
        match self.subjects.get_mut(subject_id) {
            Some(e) => {
                e.profile.photo_path = Some(photo_path);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

impl Gallery for InMemoryGallery {
    fn lookup(&self, subject_id: &str) -> Option<SubjectProfile> {
        self.subjects.get(subject_id).map(|e| e.profile.clone())
    }

    fn reload(&mut self) -> Vec<Template> {
        self.subjects
            .values()
            .map(|e| Template {
                subject_id: e.profile.subject_id.clone(),
                embedding: e.embedding.clone(),
            })
            .collect()
    }
}

/// Shared gallery, so enrollment can continue while a session owns a handle.
impl<G: Gallery> Gallery for Arc<Mutex<G>> {
    fn lookup(&self, subject_id: &str) -> Option<SubjectProfile> {
        self.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(subject_id)
    }

    fn reload(&mut self) -> Vec<Template> {
        self.lock().unwrap_or_else(PoisonError::into_inner).reload()
    }
}
