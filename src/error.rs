//
// error.rs
// xnat2bids-launcher
//
// Error taxonomy shared by the configuration, XNAT, filesystem, and submission layers.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::PathBuf;

use thiserror::Error;

/// Pre-flight configuration failures. Nothing is submitted once one of these is raised.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("unknown key `{key}` in [{section}]{}", suggestion_hint(.suggestion))]
    UnknownKey {
        section: String,
        key: String,
        suggestion: Option<String>,
    },
    #[error("`{key}` in [{section}] must be {expected}")]
    WrongKind {
        section: String,
        key: String,
        expected: &'static str,
    },
    #[error("duplicate entries in `{key}`: {}", .duplicates.join(", "))]
    Duplicates { key: String, duplicates: Vec<String> },
    #[error("{0}")]
    Selection(String),
    #[error("invalid range `{token}` for `{param}`")]
    InvalidRange { param: String, token: String },
    #[error("invalid [slurm-args]: {0}")]
    Scheduler(String),
    #[error("no container image found in {dir}: {reason}")]
    Image { dir: PathBuf, reason: String },
    #[error("{} configuration problem(s):\n  {}", .0.len(), render_all(.0))]
    Multiple(Vec<ConfigError>),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(candidate) => format!(" (did you mean `{}`?)", candidate),
        None => String::new(),
    }
}

fn render_all(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n  ")
}

impl ConfigError {
    /// Collapse a list of validation failures into a single error.
    pub fn collect(mut errors: Vec<ConfigError>) -> Result<(), ConfigError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::Multiple(errors)),
        }
    }
}

/// Failures talking to the XNAT REST API. No retries are attempted.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("unexpected response from {url}: {message}")]
    Payload { url: String, message: String },
}

#[derive(Debug, Error)]
#[error("cannot create directory {path}: {source}")]
pub struct FilesystemError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// A single scheduler submission that did not yield a job id.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Rejected {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("no job id in scheduler reply: {stdout:?}")]
    NoJobId { stdout: String },
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}
