//
// cli.rs
// xnat2bids-launcher
//
// Defines the CLI surface with Clap and dispatches the selected mode: convert, diff, update, or import.
//
// Thales Matheus Mendonça Santos - November 2025

use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::{LauncherConfig, ParamValue, ToolArgs};
use crate::launch::{self, JobContext, RunSummary};
use crate::orchestrate::Orchestrator;
use crate::schema::XNAT2BIDS;
use crate::simg;
use crate::sync;
use crate::xnat::{resolve_sessions, Credentials, XnatConnection};

/// Command-line interface: one optional output root plus mode flags.
#[derive(Parser, Debug)]
#[command(name = "xnat2bids-launcher")]
#[command(
    about = "Submit xnat2bids conversions to Slurm from a layered TOML configuration",
    long_about = None
)]
pub struct Cli {
    /// Root of the BIDS export tree (overrides `bids_root` from the configuration)
    pub bids_root: Option<PathBuf>,

    /// User configuration layered over the built-in defaults
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Report sessions missing or stale under the BIDS root, then exit
    #[arg(long, conflicts_with_all = ["update", "import"])]
    pub diff: bool,

    /// Like --diff, then submit conversions for every reported session after confirmation
    #[arg(long, conflicts_with = "import")]
    pub update: bool,

    /// Submit the project-level DICOM import from [dicom-import-args]
    #[arg(long)]
    pub import: bool,

    /// Print the (redacted) submission commands without running the scheduler
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation in --update mode
    #[arg(short, long)]
    pub yes: bool,

    /// Print the --diff report as JSON
    #[arg(long, requires = "diff")]
    pub json: bool,

    /// XNAT user (defaults to `user` in the configuration, then a prompt)
    #[arg(short, long, env = "XNAT_USER")]
    pub user: Option<String>,

    /// XNAT host (overrides `host` in the configuration)
    #[arg(long)]
    pub host: Option<String>,

    /// Shared data directory; the default BIDS root lives under it
    #[arg(long, env = "X2B_DATA_DIR", default_value = "/oscar/data/bnc")]
    pub data_dir: PathBuf,

    /// Directory holding xnat-tools-<version>.sif images
    #[arg(long, env = "X2B_SIMG_DIR", default_value = "/oscar/data/bnc/simgs/brownbnc")]
    pub simg_dir: PathBuf,

    /// Image providing bids-validator
    #[arg(
        long,
        env = "X2B_VALIDATOR_IMAGE",
        default_value = "/oscar/data/bnc/simgs/bids/validator-latest.sif"
    )]
    pub validator_image: PathBuf,

    /// Batch submission command
    #[arg(long, env = "X2B_SCHEDULER", default_value = "sbatch")]
    pub scheduler: String,

    /// Container runtime used inside each job
    #[arg(long, env = "X2B_CONTAINER_RUNTIME", default_value = "singularity")]
    pub container_runtime: String,

    /// Log filter (e.g. `debug`); defaults to RUST_LOG, then `info`
    #[arg(long)]
    pub log_level: Option<String>,
}

pub async fn run() -> anyhow::Result<ExitCode> {
    // Parse the raw CLI arguments once and dispatch to the selected mode.
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    let config = LauncherConfig::load(cli.config.as_deref()).context("Invalid configuration")?;
    let diff_mode = cli.diff || cli.update;
    if !diff_mode && !cli.import && config.selector.is_none() {
        bail!(
            "No sessions selected: set `sessions`, or `project` (and optionally `subjects`), in [{}]",
            XNAT2BIDS.section
        );
    }

    let section = tool_section(&cli, &config);
    let user = match preferred(cli.user.as_deref(), section, "user") {
        Some(user) => user,
        None => prompt_line("Enter XNAT username: ")?,
    };
    let password = read_password(&user)?;
    let credentials = Credentials { user, password };

    let host = preferred(cli.host.as_deref(), section, "host")
        .context("No XNAT host: set `host` in the configuration or pass --host")?;

    let orchestrator =
        Orchestrator::new(&cli.scheduler, &cli.container_runtime).with_dry_run(cli.dry_run);

    if cli.import {
        let args = config
            .import
            .clone()
            .with("user", ParamValue::Text(credentials.user.clone()))
            .with("host", ParamValue::Text(host));
        let image = simg::resolve_image(&cli.simg_dir, args.text("version"))?;
        let ctx = job_context(&cli, &config, &orchestrator, &credentials, image);
        let summary = launch::import_project(&ctx, &args).await?;
        return Ok(finish(&summary));
    }

    let bids_root = cli
        .bids_root
        .clone()
        .or_else(|| config.tool.text(XNAT2BIDS.output_root).map(PathBuf::from))
        .unwrap_or_else(|| default_bids_root(&cli.data_dir, &credentials.user));
    let base = config
        .tool
        .clone()
        .with(
            XNAT2BIDS.output_root,
            ParamValue::Text(bids_root.display().to_string()),
        )
        .with("user", ParamValue::Text(credentials.user.clone()))
        .with("host", ParamValue::Text(host.clone()));

    let image = if cli.diff {
        None
    } else {
        Some(simg::resolve_image(&cli.simg_dir, base.text("version"))?)
    };

    let connection = XnatConnection::open(&host, credentials.clone())
        .await
        .with_context(|| format!("Could not log in to {}", host))?;
    let outcome = match image {
        None => diff_only(&connection, &bids_root, cli.json).await,
        Some(image) => {
            let ctx = job_context(&cli, &config, &orchestrator, &credentials, image);
            convert(&cli, &ctx, &connection, &base, &bids_root).await
        }
    };
    connection.close().await;

    Ok(outcome?)
}

/// Section whose `user` and `host` apply to this run.
fn tool_section<'a>(cli: &Cli, config: &'a LauncherConfig) -> &'a ToolArgs {
    if cli.import {
        &config.import
    } else {
        &config.tool
    }
}

/// Command-line value first, then the configuration section.
fn preferred(flag: Option<&str>, section: &ToolArgs, key: &str) -> Option<String> {
    flag.or_else(|| section.text(key)).map(str::to_string)
}

fn job_context<'a>(
    cli: &Cli,
    config: &'a LauncherConfig,
    orchestrator: &'a Orchestrator,
    credentials: &'a Credentials,
    image: PathBuf,
) -> JobContext<'a> {
    JobContext {
        config,
        orchestrator,
        credentials,
        image,
        validator_image: cli.validator_image.clone(),
    }
}

async fn diff_only(
    connection: &XnatConnection,
    bids_root: &Path,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let gaps = sync::find_gaps(bids_root, connection).await?;
    sync::print_report(&gaps, json)?;
    Ok(ExitCode::SUCCESS)
}

async fn convert(
    cli: &Cli,
    ctx: &JobContext<'_>,
    connection: &XnatConnection,
    base: &ToolArgs,
    bids_root: &Path,
) -> anyhow::Result<ExitCode> {
    let session_ids = if cli.update {
        let gaps = sync::find_gaps(bids_root, connection).await?;
        sync::print_report(&gaps, false)?;
        if gaps.is_empty() {
            return Ok(ExitCode::SUCCESS);
        }
        if !cli.yes && !cli.dry_run && !confirm(&format!("Submit {} session(s)? [y/N] ", gaps.len()))? {
            println!("Aborted; nothing submitted.");
            return Ok(ExitCode::SUCCESS);
        }
        let mut ids: Vec<String> = Vec::new();
        for gap in gaps {
            if !ids.contains(&gap.remote_id) {
                ids.push(gap.remote_id);
            }
        }
        ids
    } else {
        match ctx.config.selector.as_ref() {
            Some(selector) => resolve_sessions(connection, selector).await?,
            None => bail!("No sessions selected"),
        }
    };

    tracing::info!(count = session_ids.len(), "sessions to convert");
    let summary = launch::convert_sessions(ctx, connection, base, &session_ids).await?;
    Ok(finish(&summary))
}

fn finish(summary: &RunSummary) -> ExitCode {
    summary.print();
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn default_bids_root(data_dir: &Path, user: &str) -> PathBuf {
    data_dir.join("shared").join("bids-export").join(user)
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("xnat2bids_launcher=info"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
    Ok(())
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No value entered");
    }
    Ok(value)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

/// `XNAT_PASS`, then a hidden prompt on a terminal, then the first line of stdin.
fn read_password(user: &str) -> anyhow::Result<String> {
    if let Ok(password) = std::env::var("XNAT_PASS") {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    let password = if io::stdin().is_terminal() {
        rpassword::prompt_password(format!("Enter XNAT password for {}: ", user))?
    } else {
        let mut input = String::new();
        io::stdin().read_to_string(&mut input)?;
        input.lines().next().unwrap_or_default().to_string()
    };
    if password.trim().is_empty() {
        bail!("XNAT password must not be empty");
    }
    Ok(password)
}
