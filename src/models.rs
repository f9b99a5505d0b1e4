//
// models.rs
// xnat2bids-launcher
//
// Defines the records passed between the resolver, the orchestrator, and the sync engine.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One XNAT session and where its BIDS output lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    pub id: String,
    pub project: String,
    pub subject: String,
    pub bids_subject: String,
    pub bids_session: String,
}

/// A session as listed under an XNAT project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub id: String,
    pub label: String,
    pub project: String,
    pub subject_label: Option<String>,
    pub insert_date: Option<NaiveDate>,
    pub last_modified: Option<NaiveDate>,
}

/// Everything needed to submit one scheduler job. Built once, consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledJob {
    /// Session id (or project, for imports); used for logging and the summary.
    pub unit: String,
    pub image: PathBuf,
    pub tool_command: String,
    pub arguments: Vec<String>,
    pub bind_paths: BTreeSet<String>,
    pub directives: Vec<String>,
    /// Rendered `--output` path; its directory must exist before submission.
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub submission_id: String,
    pub unit: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GapReason {
    Missing,
    Stale,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapReason::Missing => write!(f, "MISSING"),
            GapReason::Stale => write!(f, "STALE"),
        }
    }
}

/// A remote session that is absent or out of date in the local BIDS tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncGap {
    pub project: String,
    pub study: String,
    pub subject: String,
    pub session: String,
    pub remote_id: String,
    pub reason: GapReason,
}
