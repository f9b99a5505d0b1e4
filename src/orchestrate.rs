//
// orchestrate.rs
// xnat2bids-launcher
//
// Wraps compiled jobs into sbatch submissions, spawns them back-to-back, joins their replies,
// and chains the dependent bids-validator jobs.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tokio::task::JoinHandle as TaskHandle;

use crate::error::SubmitError;
use crate::layout::ensure_dir;
use crate::models::{CompiledJob, JobHandle};
use crate::schema::CREDENTIAL_FLAG;

const REDACTED: &str = "********";
const ACCEPTED_PREFIX: &str = "Submitted batch job ";

/// Outcome of submitting a batch of jobs.
#[derive(Debug, Default)]
pub struct SubmissionReport {
    pub launched: Vec<JobHandle>,
    pub failures: Vec<(String, SubmitError)>,
}

#[derive(Debug, Clone)]
pub struct Orchestrator {
    scheduler: String,
    container_runtime: String,
    dry_run: bool,
}

impl Orchestrator {
    pub fn new(scheduler: impl Into<String>, container_runtime: impl Into<String>) -> Self {
        Self {
            scheduler: scheduler.into(),
            container_runtime: container_runtime.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Argument vector of the container invocation that runs inside the job.
    pub fn container_command(&self, job: &CompiledJob, redacted: bool) -> Vec<String> {
        let mut argv = vec![
            self.container_runtime.clone(),
            "exec".to_string(),
            "--no-home".to_string(),
        ];
        if !job.bind_paths.is_empty() {
            argv.push("-B".to_string());
            argv.push(job.bind_paths.iter().cloned().collect::<Vec<_>>().join(","));
        }
        argv.push(job.image.display().to_string());
        argv.push(job.tool_command.clone());
        if redacted {
            argv.extend(redact(&job.arguments));
        } else {
            argv.extend(job.arguments.iter().cloned());
        }
        argv
    }

    /// Full `sbatch` argument vector; the payload becomes a single `--wrap` script.
    pub fn submission_command(&self, job: &CompiledJob, redacted: bool) -> Vec<String> {
        let mut argv = vec![self.scheduler.clone()];
        argv.extend(job.directives.iter().cloned());
        argv.push("--wrap".to_string());
        argv.push(shell_join(&self.container_command(job, redacted)));
        argv
    }

    /// Spawn one submission per job without waiting in between, then join all replies.
    ///
    /// A job that cannot be submitted is recorded as a failure; the others still go out.
    pub async fn submit_all(&self, jobs: Vec<CompiledJob>) -> SubmissionReport {
        let mut report = SubmissionReport::default();
        let mut pending: Vec<(String, TaskHandle<Result<String, SubmitError>>)> = Vec::new();

        for job in jobs {
            let shown = shell_join(&self.submission_command(&job, true));
            if self.dry_run {
                println!("{}", shown);
                continue;
            }
            tracing::info!(unit = %job.unit, command = %shown, "submitting job");

            if let Some(log_dir) = job_log_dir(&job) {
                if let Err(err) = ensure_dir(log_dir) {
                    tracing::error!(unit = %job.unit, "{}", err);
                    report.failures.push((job.unit.clone(), err.into()));
                    continue;
                }
            }

            let argv = self.submission_command(&job, false);
            match spawn_submission(&argv) {
                Ok(task) => pending.push((job.unit.clone(), task)),
                Err(err) => {
                    tracing::error!(unit = %job.unit, "{}", err);
                    report.failures.push((job.unit.clone(), err));
                }
            }
        }

        for (unit, task) in pending {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(SubmitError::Spawn {
                    program: self.scheduler.clone(),
                    source: std::io::Error::other(join_err.to_string()),
                }),
            };
            match outcome {
                Ok(submission_id) => {
                    tracing::info!(%unit, job_id = %submission_id, "job accepted");
                    report.launched.push(JobHandle {
                        submission_id,
                        unit,
                        depends_on: Vec::new(),
                    });
                }
                Err(err) => {
                    tracing::error!(%unit, "submission failed: {}", err);
                    report.failures.push((unit, err));
                }
            }
        }

        report
    }

    /// Submit `job` so that it only runs once every job in `depends_on` succeeded.
    pub async fn submit_dependent(
        &self,
        mut job: CompiledJob,
        depends_on: &[String],
    ) -> Result<Option<JobHandle>, SubmitError> {
        if !depends_on.is_empty() {
            job.directives
                .push(format!("--dependency=afterok:{}", depends_on.join(":")));
        }

        let mut report = self.submit_all(vec![job]).await;
        if let Some((_, err)) = report.failures.pop() {
            return Err(err);
        }
        Ok(report.launched.pop().map(|mut handle| {
            handle.depends_on = depends_on.to_vec();
            handle
        }))
    }
}

fn job_log_dir(job: &CompiledJob) -> Option<&Path> {
    job.log_path
        .as_deref()
        .and_then(Path::parent)
        .filter(|p| !p.as_os_str().is_empty())
}

fn spawn_submission(argv: &[String]) -> Result<TaskHandle<Result<String, SubmitError>>, SubmitError> {
    let program = argv[0].clone();
    let child = Command::new(&program)
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SubmitError::Spawn {
            program: program.clone(),
            source,
        })?;

    Ok(tokio::spawn(async move {
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| SubmitError::Spawn {
                program: program.clone(),
                source,
            })?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            return Err(SubmitError::Rejected {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_job_id(&stdout).ok_or(SubmitError::NoJobId { stdout })
    }))
}

/// Job id from sbatch's `Submitted batch job 123456` reply.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let rest = line.trim().strip_prefix(ACCEPTED_PREFIX)?;
        let id = rest.split_whitespace().next()?;
        id.chars().all(|c| c.is_ascii_digit()).then(|| id.to_string())
    })
}

/// Copy of `argv` with the credential value elided up to the next `--` flag.
pub fn redact(argv: &[String]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(argv.len());
    let mut tokens = argv.iter().peekable();
    while let Some(token) = tokens.next() {
        redacted.push(token.clone());
        if token == CREDENTIAL_FLAG {
            // The first token is always the value, even if it looks like a flag.
            if tokens.next().is_some() {
                redacted.push(REDACTED.to_string());
            }
            while tokens.next_if(|t| !t.starts_with("--")).is_some() {}
        }
    }
    redacted
}

/// Join tokens into one POSIX shell string, quoting where needed.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|token| shell_quote(token))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}
