//
// layout.rs
// xnat2bids-launcher
//
// Maps XNAT projects, subjects, and sessions onto the BIDS export tree and creates directories safely.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::FilesystemError;

/// Separator between the PI prefix and the study name in a project id,
/// and between subject and session in a session label.
pub const LABEL_SEPARATOR: char = '_';

/// Root of the BIDS export tree: `{root}/{pi}/study-{study}/bids/sub-{subject}/ses-{session}`.
#[derive(Debug, Clone)]
pub struct BidsLayout {
    root: PathBuf,
}

impl BidsLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// `{root}/{pi}/study-{study}/bids` for an XNAT project id.
    pub fn bids_dir(&self, project: &str) -> PathBuf {
        let (pi, study) = split_project(project);
        self.study_dir(pi, study).join("bids")
    }

    pub fn study_dir(&self, pi: &str, study: &str) -> PathBuf {
        self.root.join(pi).join(format!("study-{}", study))
    }

    pub fn session_dir(&self, pi: &str, study: &str, subject: &str, session: &str) -> PathBuf {
        self.study_dir(pi, study)
            .join("bids")
            .join(format!("sub-{}", subject))
            .join(format!("ses-{}", session))
    }
}

/// `"sanes_sadlum"` -> `("sanes", "sadlum")`. A project without a separator is its own PI and study.
pub fn split_project(project: &str) -> (&str, &str) {
    project
        .split_once(LABEL_SEPARATOR)
        .unwrap_or((project, project))
}

/// Inverse of [`split_project`] for directories found on disk.
///
/// `demo/study-demo` is the tree of the separator-less project `demo`.
pub fn join_project(pi: &str, study: &str) -> String {
    if pi == study {
        return pi.to_string();
    }
    format!("{}{}{}", pi, LABEL_SEPARATOR, study)
}

/// BIDS subject and session labels for an XNAT session label.
///
/// `"001_02"` yields `("001", "02")`. A label without a separator is the only
/// session of `subject_fallback` (or of the label itself) and gets session `01`.
/// Only the first separator splits; later ones are dropped by sanitizing.
pub fn bids_labels(label: &str, subject_fallback: Option<&str>) -> (String, String) {
    match label.split_once(LABEL_SEPARATOR) {
        Some((subject, session)) => {
            if session.contains(LABEL_SEPARATOR) {
                tracing::warn!(label, "session label has more than one separator");
            }
            (
                sanitize_label(subject.trim_start_matches("sub-")),
                sanitize_label(session.trim_start_matches("ses-")),
            )
        }
        None => {
            let subject = subject_fallback.unwrap_or(label);
            (
                sanitize_label(subject.trim_start_matches("sub-")),
                "01".to_string(),
            )
        }
    }
}

/// BIDS labels are alphanumeric only.
pub fn sanitize_label(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Create `path` and its parents; existing directories are fine.
pub fn ensure_dir(path: &Path) -> Result<(), FilesystemError> {
    fs::create_dir_all(path).map_err(|source| FilesystemError {
        path: path.to_path_buf(),
        source,
    })
}
