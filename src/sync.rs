//
// sync.rs
// xnat2bids-launcher
//
// Compares the local BIDS export tree with XNAT project listings to find sessions that are
// missing locally or were changed remotely after the local export.
//
// Thales Matheus Mendonça Santos - November 2025

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use walkdir::WalkDir;

use crate::layout::{bids_labels, join_project, BidsLayout};
use crate::models::{GapReason, RemoteSession, SyncGap};
use crate::xnat::SessionCatalog;

const STUDY_PREFIX: &str = "study-";

/// Every remote session of every locally exported study that needs (re)export.
pub async fn find_gaps<C: SessionCatalog>(local_root: &Path, catalog: &C) -> Result<Vec<SyncGap>> {
    let layout = BidsLayout::new(local_root);
    let mut gaps = Vec::new();

    for (pi, study) in local_studies(local_root)? {
        let project = join_project(&pi, &study);
        let sessions = catalog
            .project_sessions(&project)
            .await
            .with_context(|| format!("Failed to list sessions of project {}", project))?;
        tracing::debug!(%project, count = sessions.len(), "comparing remote sessions");

        for remote in sessions {
            let (subject, session) = bids_labels(&remote.label, remote.subject_label.as_deref());
            let path = layout.session_dir(&pi, &study, &subject, &session);
            let local_created = if path.is_dir() {
                Some(created_at(&path)?)
            } else {
                None
            };

            if let Some(reason) = classify(&remote, local_created) {
                gaps.push(SyncGap {
                    project: project.clone(),
                    study: study.clone(),
                    subject,
                    session,
                    remote_id: remote.id.clone(),
                    reason,
                });
            }
        }
    }

    Ok(gaps)
}

/// `(pi, study)` pairs for every `{root}/{pi}/study-{study}` directory, sorted by name.
pub fn local_studies(root: &Path) -> Result<Vec<(String, String)>> {
    let mut studies = Vec::new();
    for pi_dir in subdirectories(root)? {
        let pi = file_name(pi_dir.path());
        for study_dir in subdirectories(pi_dir.path())? {
            let name = file_name(study_dir.path());
            match name.strip_prefix(STUDY_PREFIX) {
                Some(study) if !study.is_empty() => studies.push((pi.clone(), study.to_string())),
                _ => tracing::debug!(path = %study_dir.path().display(), "skipping non-study directory"),
            }
        }
    }
    Ok(studies)
}

fn subdirectories(dir: &Path) -> Result<Vec<walkdir::DirEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type().is_dir() && !hidden {
            entries.push(entry);
        }
    }
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Local creation time of `path`, falling back to its modification time.
fn created_at(path: &Path) -> Result<NaiveDateTime> {
    let metadata = fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
    let created = metadata
        .created()
        .or_else(|_| metadata.modified())
        .with_context(|| format!("No timestamps for {}", path.display()))?;
    Ok(DateTime::<Local>::from(created).naive_local())
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

/// MISSING when there is no local copy; STALE when either remote date is later than it.
///
/// Remote dates are day-granular, so a same-day change after the export is not seen;
/// a local copy that is newer than the remote never counts.
pub fn classify(remote: &RemoteSession, local_created: Option<NaiveDateTime>) -> Option<GapReason> {
    let Some(created) = local_created else {
        return Some(GapReason::Missing);
    };
    let newer = [remote.last_modified, remote.insert_date]
        .into_iter()
        .flatten()
        .any(|date| midnight(date) > created);
    newer.then_some(GapReason::Stale)
}

/// Print the gap report as a table or as JSON.
pub fn print_report(gaps: &[SyncGap], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(gaps)?);
        return Ok(());
    }
    if gaps.is_empty() {
        println!("Local BIDS tree is up to date.");
        return Ok(());
    }
    println!(
        "{:<8} {:<24} {:<16} {:<10} {:<10} {}",
        "REASON", "PROJECT", "STUDY", "SUBJECT", "SESSION", "XNAT ID"
    );
    for gap in gaps {
        println!(
            "{:<8} {:<24} {:<16} {:<10} {:<10} {}",
            gap.reason, gap.project, gap.study, gap.subject, gap.session, gap.remote_id
        );
    }
    println!("{} session(s) need export.", gaps.len());
    Ok(())
}
