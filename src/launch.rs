//
// launch.rs
// xnat2bids-launcher
//
// Drives one run end to end: per-session resolution and compilation, submission,
// the dependent validation jobs, and the final summary.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::compile::{compile, scheduler_directives};
use crate::config::{LauncherConfig, ParamValue, ToolArgs};
use crate::error::ConfigError;
use crate::layout::BidsLayout;
use crate::models::{CompiledJob, JobHandle};
use crate::orchestrate::{Orchestrator, SubmissionReport};
use crate::schema::{ToolSchema, CREDENTIAL_FLAG, DICOM_IMPORT, XNAT2BIDS};
use crate::xnat::{session_hierarchy, Credentials, SessionCatalog};

const VALIDATOR_COMMAND: &str = "bids-validator";

/// Everything a run needs to turn resolved arguments into jobs.
pub struct JobContext<'a> {
    pub config: &'a LauncherConfig,
    pub orchestrator: &'a Orchestrator,
    pub credentials: &'a Credentials,
    pub image: PathBuf,
    pub validator_image: PathBuf,
}

/// What was launched, and what could not be.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub dry_run: bool,
    pub launched: Vec<JobHandle>,
    pub validation: Vec<JobHandle>,
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    fn absorb(&mut self, report: SubmissionReport) {
        self.launched.extend(report.launched);
        self.failures.extend(
            report
                .failures
                .into_iter()
                .map(|(unit, err)| (unit, err.to_string())),
        );
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn print(&self) {
        if self.dry_run {
            println!("Dry run: no jobs were submitted.");
            return;
        }
        println!("Launched {} conversion job(s).", self.launched.len());
        for handle in &self.launched {
            println!("  {} -> job {}", handle.unit, handle.submission_id);
        }
        if !self.validation.is_empty() {
            println!("Launched {} validation job(s).", self.validation.len());
            for handle in &self.validation {
                println!(
                    "  {} -> job {} (after {})",
                    handle.unit,
                    handle.submission_id,
                    handle.depends_on.join(":")
                );
            }
        }
        if !self.failures.is_empty() {
            println!("{} submission(s) failed:", self.failures.len());
            for (unit, reason) in &self.failures {
                println!("  {}: {}", unit, reason);
            }
        }
    }
}

/// Compile, submit, and validate the given sessions.
///
/// Every session is compiled before anything is submitted, so a bad range or
/// parameter aborts the run without launching a partial set of jobs.
pub async fn convert_sessions<C: SessionCatalog>(
    ctx: &JobContext<'_>,
    catalog: &C,
    base: &ToolArgs,
    session_ids: &[String],
) -> Result<RunSummary> {
    let mut summary = RunSummary::new(ctx.orchestrator.is_dry_run());
    if session_ids.is_empty() {
        tracing::warn!("no sessions to convert");
        return Ok(summary);
    }

    let resolved: Vec<(String, ToolArgs)> = session_ids
        .iter()
        .map(|id| (id.clone(), ctx.config.resolve_session(base, id)))
        .collect();
    let jobs = resolved
        .iter()
        .map(|(id, args)| tool_job(ctx, &XNAT2BIDS, args, id))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let export_only = resolved.iter().any(|(_, args)| args.flag("export-only"));
    let targets = if export_only {
        BTreeMap::new()
    } else {
        validation_targets(catalog, &resolved).await?
    };

    tracing::info!(count = jobs.len(), "submitting conversion jobs");
    summary.absorb(ctx.orchestrator.submit_all(jobs).await);

    if export_only {
        tracing::info!("export-only requested; skipping bids-validator");
        return Ok(summary);
    }
    if summary.launched.is_empty() && !summary.dry_run {
        tracing::warn!("no conversion job was launched; skipping bids-validator");
        return Ok(summary);
    }

    let upstream: Vec<String> = summary
        .launched
        .iter()
        .map(|handle| handle.submission_id.clone())
        .collect();
    for (bids_dir, project) in targets {
        let job = validation_job(ctx, &bids_dir, &project);
        let unit = job.unit.clone();
        match ctx.orchestrator.submit_dependent(job, &upstream).await {
            Ok(Some(handle)) => summary.validation.push(handle),
            Ok(None) => {}
            Err(err) => {
                tracing::error!(%unit, "validation submission failed: {}", err);
                summary.failures.push((unit, err.to_string()));
            }
        }
    }

    Ok(summary)
}

/// Submit the project-level DICOM import described by `[dicom-import-args]`.
pub async fn import_project(ctx: &JobContext<'_>, args: &ToolArgs) -> Result<RunSummary> {
    let project = args.text("project").ok_or_else(|| {
        ConfigError::Selection(format!("[{}] requires `project`", DICOM_IMPORT.section))
    })?;
    let job = tool_job(ctx, &DICOM_IMPORT, args, project)?;

    let mut summary = RunSummary::new(ctx.orchestrator.is_dry_run());
    summary.absorb(ctx.orchestrator.submit_all(vec![job]).await);
    Ok(summary)
}

/// One distinct BIDS directory per project, sorted, mapped to its project id.
async fn validation_targets<C: SessionCatalog>(
    catalog: &C,
    resolved: &[(String, ToolArgs)],
) -> Result<BTreeMap<PathBuf, String>> {
    let mut targets = BTreeMap::new();
    for (id, args) in resolved {
        let Some(root) = args.text(XNAT2BIDS.output_root) else {
            tracing::warn!(session = %id, "no bids_root; cannot validate this session's output");
            continue;
        };
        let descriptor = session_hierarchy(catalog, id).await?;
        tracing::debug!(
            session = %id,
            project = %descriptor.project,
            subject = %descriptor.bids_subject,
            bids_session = %descriptor.bids_session,
            "resolved session hierarchy"
        );
        let dir = BidsLayout::new(root).bids_dir(&descriptor.project);
        targets.entry(dir).or_insert(descriptor.project);
    }
    Ok(targets)
}

fn tool_job(
    ctx: &JobContext<'_>,
    schema: &ToolSchema,
    args: &ToolArgs,
    unit: &str,
) -> Result<CompiledJob, ConfigError> {
    let args = args
        .clone()
        .with("user", ParamValue::Text(ctx.credentials.user.clone()));
    let compiled = compile(schema, &args, unit)?;
    let mut arguments = compiled.arguments;
    arguments.push(CREDENTIAL_FLAG.to_string());
    arguments.push(ctx.credentials.password.clone());

    let slurm = &ctx.config.slurm;
    let log_path = slurm.log_path(&ctx.credentials.user, unit);
    let job_name = if schema.command == XNAT2BIDS.command {
        slurm.job_name.as_deref().unwrap_or(schema.command)
    } else {
        schema.command
    };

    Ok(CompiledJob {
        unit: unit.to_string(),
        image: ctx.image.clone(),
        tool_command: schema.command.to_string(),
        arguments,
        bind_paths: compiled.bind_paths,
        directives: scheduler_directives(slurm, job_name, log_path.as_deref()),
        log_path: log_path.map(PathBuf::from),
    })
}

fn validation_job(ctx: &JobContext<'_>, bids_dir: &Path, project: &str) -> CompiledJob {
    let unit = format!("{}_{}", VALIDATOR_COMMAND, project);
    let dir = bids_dir.display().to_string();
    let log_path = ctx.config.slurm.log_path(&ctx.credentials.user, &unit);

    CompiledJob {
        unit,
        image: ctx.validator_image.clone(),
        tool_command: VALIDATOR_COMMAND.to_string(),
        arguments: vec![dir.clone()],
        bind_paths: BTreeSet::from([dir]),
        directives: scheduler_directives(&ctx.config.slurm, VALIDATOR_COMMAND, log_path.as_deref()),
        log_path: log_path.map(PathBuf::from),
    }
}
