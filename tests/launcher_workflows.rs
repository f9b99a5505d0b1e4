//
// launcher_workflows.rs
// xnat2bids-launcher
//
// Integration-style tests that drive whole runs against a fake sbatch script and an in-memory XNAT catalog.
//
// Thales Matheus Mendonça Santos - November 2025

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use xnat2bids_launcher::config::LauncherConfig;
use xnat2bids_launcher::error::{ConfigError, RemoteError};
use xnat2bids_launcher::launch::{convert_sessions, import_project, JobContext};
use xnat2bids_launcher::models::RemoteSession;
use xnat2bids_launcher::orchestrate::Orchestrator;
use xnat2bids_launcher::xnat::{Credentials, SessionCatalog, SessionInfo};
use tempfile::{tempdir, TempDir};

/// Every session belongs to `sanes_sadlum`, subject `001`.
struct Catalog;

impl SessionCatalog for Catalog {
    async fn session_info(&self, session_id: &str) -> Result<SessionInfo, RemoteError> {
        Ok(SessionInfo {
            project: "sanes_sadlum".into(),
            subject_id: "XNAT_S001".into(),
            label: format!("001_{}", &session_id[session_id.len() - 2..]),
        })
    }

    async fn subject_label(&self, _subject_id: &str) -> Result<String, RemoteError> {
        Ok("001".into())
    }

    async fn project_sessions(&self, _project: &str) -> Result<Vec<RemoteSession>, RemoteError> {
        Ok(Vec::new())
    }

    async fn subject_sessions(
        &self,
        _project: &str,
        _subject: &str,
    ) -> Result<Vec<RemoteSession>, RemoteError> {
        Ok(Vec::new())
    }
}

struct Workspace {
    dir: TempDir,
    scheduler: PathBuf,
    calls: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        // The fake scheduler records its argv, rejects XNAT_E001, and numbers the rest.
        let dir = tempdir().expect("tempdir");
        let calls = dir.path().join("calls.txt");
        let scheduler = dir.path().join("sbatch");
        let script = format!(
            r#"#!/bin/sh
echo "$@" >> "{calls}"
case "$*" in
  *XNAT_E001*) echo "sbatch: error: invalid account" >&2; exit 1 ;;
  *XNAT_E002*) echo "Submitted batch job 5002" ;;
  *) echo "Submitted batch job 9000" ;;
esac
"#,
            calls = calls.display()
        );
        fs::write(&scheduler, script).expect("write script");
        fs::set_permissions(&scheduler, fs::Permissions::from_mode(0o755)).expect("chmod");
        Self {
            dir,
            scheduler,
            calls,
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self, body: &str) -> Result<LauncherConfig, ConfigError> {
        let path = self.path().join("x2b.toml");
        let text = format!(
            "[slurm-args]\noutput = \"{}/logs/{{user}}/x2b_{{session}}-%J.txt\"\n\n{}",
            self.path().display(),
            body
        );
        fs::write(&path, text).expect("write config");
        LauncherConfig::load(Some(&path))
    }

    fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

fn credentials() -> Credentials {
    Credentials {
        user: "jdoe".into(),
        password: "s3cret".into(),
    }
}

#[tokio::test]
async fn rejected_session_does_not_stop_the_others() {
    let ws = Workspace::new();
    let config = ws
        .config(&format!(
            "[xnat2bids-args]\nsessions = [\"XNAT_E001\", \"XNAT_E002\"]\nbids_root = \"{}/bids\"\n",
            ws.path().display()
        ))
        .expect("config");
    let orchestrator = Orchestrator::new(ws.scheduler.display().to_string(), "singularity");
    let creds = credentials();
    let ctx = JobContext {
        config: &config,
        orchestrator: &orchestrator,
        credentials: &creds,
        image: PathBuf::from("/simgs/xnat-tools-1.4.2.sif"),
        validator_image: PathBuf::from("/simgs/validator.sif"),
    };
    let ids = vec!["XNAT_E001".to_string(), "XNAT_E002".to_string()];

    let summary = convert_sessions(&ctx, &Catalog, &config.tool, &ids)
        .await
        .expect("run");

    assert!(!summary.is_success());
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].0, "XNAT_E001");
    assert!(summary.failures[0].1.contains("invalid account"));
    assert_eq!(summary.launched.len(), 1);
    assert_eq!(summary.launched[0].unit, "XNAT_E002");
    assert_eq!(summary.launched[0].submission_id, "5002");

    assert_eq!(summary.validation.len(), 1);
    let validation = &summary.validation[0];
    assert_eq!(validation.unit, "bids-validator_sanes_sadlum");
    assert_eq!(validation.submission_id, "9000");
    assert_eq!(validation.depends_on, vec!["5002".to_string()]);

    let calls = ws.calls();
    assert_eq!(calls.len(), 3);
    let validator_call = calls
        .iter()
        .find(|c| c.contains("bids-validator"))
        .expect("validator submitted");
    assert!(validator_call.contains("--dependency=afterok:5002"));
    assert!(validator_call.contains("sanes/study-sadlum/bids"));

    let conversion = calls
        .iter()
        .find(|c| c.contains("XNAT_E002"))
        .expect("conversion submitted");
    assert!(conversion.contains("--user jdoe"));
    assert!(conversion.contains("--pass s3cret"));
    assert!(conversion.contains("xnat-tools-1.4.2.sif xnat2bids XNAT_E002"));
    assert!(ws.path().join("logs").join("jdoe").is_dir());
}

#[tokio::test]
async fn export_only_skips_validation() {
    let ws = Workspace::new();
    let config = ws
        .config(&format!(
            "[xnat2bids-args]\nsessions = [\"XNAT_E002\"]\nbids_root = \"{}/bids\"\nexport-only = true\n",
            ws.path().display()
        ))
        .expect("config");
    let orchestrator = Orchestrator::new(ws.scheduler.display().to_string(), "singularity");
    let creds = credentials();
    let ctx = JobContext {
        config: &config,
        orchestrator: &orchestrator,
        credentials: &creds,
        image: PathBuf::from("/simgs/xnat-tools-1.4.2.sif"),
        validator_image: PathBuf::from("/simgs/validator.sif"),
    };

    let summary = convert_sessions(&ctx, &Catalog, &config.tool, &["XNAT_E002".to_string()])
        .await
        .expect("run");

    assert!(summary.is_success());
    assert_eq!(summary.launched.len(), 1);
    assert!(summary.validation.is_empty());
    assert!(ws.calls().iter().all(|c| !c.contains("bids-validator")));
    assert!(ws.calls()[0].contains("--export-only"));
}

#[tokio::test]
async fn dry_run_submits_nothing() {
    let ws = Workspace::new();
    let config = ws
        .config(&format!(
            "[xnat2bids-args]\nsessions = [\"XNAT_E001\"]\nbids_root = \"{}/bids\"\nincludeseq = \"1-3\"\n",
            ws.path().display()
        ))
        .expect("config");
    let orchestrator =
        Orchestrator::new(ws.scheduler.display().to_string(), "singularity").with_dry_run(true);
    let creds = credentials();
    let ctx = JobContext {
        config: &config,
        orchestrator: &orchestrator,
        credentials: &creds,
        image: PathBuf::from("/simgs/xnat-tools-1.4.2.sif"),
        validator_image: PathBuf::from("/simgs/validator.sif"),
    };

    let summary = convert_sessions(&ctx, &Catalog, &config.tool, &["XNAT_E001".to_string()])
        .await
        .expect("run");

    assert!(summary.dry_run);
    assert!(summary.is_success());
    assert!(summary.launched.is_empty());
    assert!(ws.calls().is_empty());
    assert!(!ws.path().join("logs").exists());
}

#[tokio::test]
async fn bad_range_aborts_before_any_submission() {
    let ws = Workspace::new();
    let config = ws
        .config(&format!(
            "[xnat2bids-args]\nsessions = [\"XNAT_E002\", \"XNAT_E003\"]\nbids_root = \"{}/bids\"\n\n[XNAT_E003]\nskipseq = \"9-2\"\n",
            ws.path().display()
        ))
        .expect("config");
    let orchestrator = Orchestrator::new(ws.scheduler.display().to_string(), "singularity");
    let creds = credentials();
    let ctx = JobContext {
        config: &config,
        orchestrator: &orchestrator,
        credentials: &creds,
        image: PathBuf::from("/simgs/xnat-tools-1.4.2.sif"),
        validator_image: PathBuf::from("/simgs/validator.sif"),
    };
    let ids = vec!["XNAT_E002".to_string(), "XNAT_E003".to_string()];

    let err = convert_sessions(&ctx, &Catalog, &config.tool, &ids)
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::InvalidRange { .. })
    ));
    assert!(ws.calls().is_empty());
}

#[tokio::test]
async fn import_requires_a_project() {
    let ws = Workspace::new();
    let config = ws.config("").expect("config");
    let orchestrator = Orchestrator::new(ws.scheduler.display().to_string(), "singularity");
    let creds = credentials();
    let ctx = JobContext {
        config: &config,
        orchestrator: &orchestrator,
        credentials: &creds,
        image: PathBuf::from("/simgs/xnat-tools-1.4.2.sif"),
        validator_image: PathBuf::from("/simgs/validator.sif"),
    };
    assert!(import_project(&ctx, &config.import).await.is_err());

    let config = ws
        .config(&format!(
            "[dicom-import-args]\nproject = \"sanes_sadlum\"\ndata_dir = \"{}/dicom\"\n",
            ws.path().display()
        ))
        .expect("config");
    let ctx = JobContext {
        config: &config,
        ..ctx
    };
    let summary = import_project(&ctx, &config.import).await.expect("import");
    assert_eq!(summary.launched.len(), 1);
    assert_eq!(summary.launched[0].unit, "sanes_sadlum");
    let calls = ws.calls();
    assert!(calls[0].contains("dicom-import sanes_sadlum"));
    assert!(calls[0].contains("--job-name dicom-import"));
}

#[test]
fn contradictory_selection_is_rejected_at_load() {
    let ws = Workspace::new();
    let err = ws
        .config("[xnat2bids-args]\nsessions = [\"XNAT_E001\"]\nsubjects = [\"001\"]\n")
        .unwrap_err();
    assert!(err.to_string().contains("subjects"));
}
