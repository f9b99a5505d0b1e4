//
// config.rs
// xnat2bids-launcher
//
// Loads the layered TOML configuration, merges user values over the built-in defaults,
// and validates every section into typed records before anything is compiled.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use similar::TextDiff;
use toml::{Table, Value};

use crate::error::ConfigError;
use crate::schema::{ParamKind, ToolSchema, DICOM_IMPORT, XNAT2BIDS};

pub const SLURM_SECTION: &str = "slurm-args";

/// Minimum similarity ratio for offering a "did you mean" suggestion.
pub const SUGGESTION_CUTOFF: f32 = 0.6;

const DEFAULT_CONFIG: &str = include_str!("config/x2b_default_config.toml");

/// A typed tool-argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl ParamValue {
    /// Empty strings and empty lists are treated like absent keys.
    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Text(s) => s.is_empty(),
            ParamValue::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "{}", s),
            ParamValue::Int(n) => write!(f, "{}", n),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// Ordered tool arguments for one unit of work.
///
/// Overwriting a key keeps its position; new keys are appended, so iteration
/// order is the insertion order of the layered configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    entries: Vec<(String, ParamValue)>,
}

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Non-empty text value of `key`.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(ParamValue::Text(s)) if !s.is_empty() => Some(s),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(ParamValue::Bool(true)))
    }

    pub fn set(&mut self, key: &str, value: ParamValue) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn with(mut self, key: &str, value: ParamValue) -> Self {
        self.set(key, value);
        self
    }

    /// New arguments with every key of `overrides` replacing (or appended to) ours.
    pub fn layered(&self, overrides: &ToolArgs) -> ToolArgs {
        let mut merged = self.clone();
        for (key, value) in &overrides.entries {
            merged.set(key, value.clone());
        }
        merged
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type-check a raw section against `schema`.
    ///
    /// Reserved (selection) keys are only accepted when `allow_reserved` is set;
    /// session override blocks may only carry tool parameters.
    pub fn from_table(
        schema: &ToolSchema,
        section: &str,
        table: &Table,
        allow_reserved: bool,
    ) -> Result<ToolArgs, Vec<ConfigError>> {
        let mut args = ToolArgs::new();
        let mut errors = Vec::new();

        for (key, raw) in table {
            let kind = if let Some(descriptor) = schema.lookup(key) {
                KeyKind::Param(descriptor.kind)
            } else if allow_reserved && schema.is_reserved(key) {
                KeyKind::Reserved
            } else {
                let candidates: Vec<&str> = if allow_reserved {
                    schema.known_keys().collect()
                } else {
                    schema.params.iter().map(|p| p.name).collect()
                };
                errors.push(ConfigError::UnknownKey {
                    section: section.to_string(),
                    key: key.clone(),
                    suggestion: suggest(key, &candidates),
                });
                continue;
            };

            match typed_value(key, kind, raw) {
                Some(value) => args.set(key, value),
                None => errors.push(ConfigError::WrongKind {
                    section: section.to_string(),
                    key: key.clone(),
                    expected: kind.expected(key),
                }),
            }
        }

        if errors.is_empty() {
            Ok(args)
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Copy, Clone)]
enum KeyKind {
    Param(ParamKind),
    Reserved,
}

impl KeyKind {
    fn expected(self, key: &str) -> &'static str {
        match self {
            KeyKind::Param(ParamKind::Value) => "a string",
            KeyKind::Param(ParamKind::MultiValue) => "a string or a list",
            KeyKind::Param(ParamKind::Flag) => "a boolean",
            KeyKind::Param(ParamKind::RepeatedFlag) => "a non-negative integer",
            KeyKind::Reserved if is_list_key(key) => "a list of strings",
            KeyKind::Reserved => "a string",
        }
    }
}

fn is_list_key(key: &str) -> bool {
    key == "sessions" || key == "subjects"
}

fn scalar_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

fn typed_value(key: &str, kind: KeyKind, raw: &Value) -> Option<ParamValue> {
    match kind {
        KeyKind::Param(ParamKind::Value) => scalar_text(raw).map(ParamValue::Text),
        KeyKind::Param(ParamKind::MultiValue) => match raw {
            Value::Array(items) => items
                .iter()
                .map(scalar_text)
                .collect::<Option<Vec<_>>>()
                .map(ParamValue::List),
            other => scalar_text(other).map(ParamValue::Text),
        },
        KeyKind::Param(ParamKind::Flag) => raw.as_bool().map(ParamValue::Bool),
        KeyKind::Param(ParamKind::RepeatedFlag) => raw
            .as_integer()
            .filter(|n| *n >= 0)
            .map(ParamValue::Int),
        KeyKind::Reserved if is_list_key(key) => match raw {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .map(ParamValue::List),
            _ => None,
        },
        KeyKind::Reserved => raw.as_str().map(|s| ParamValue::Text(s.to_string())),
    }
}

/// Nearest known key, if it is similar enough to be a plausible typo.
pub fn suggest(key: &str, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .map(|candidate| {
            let ratio = TextDiff::from_chars(key, *candidate).ratio();
            (ratio, *candidate)
        })
        .filter(|(ratio, _)| *ratio >= SUGGESTION_CUTOFF)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.to_string())
}

/// A scalar Slurm directive value (`mem = 16000` or `mem = "16G"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SlurmValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for SlurmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlurmValue::Int(n) => write!(f, "{}", n),
            SlurmValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Typed `[slurm-args]` section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SlurmArgs {
    pub time: Option<SlurmValue>,
    pub mem: Option<SlurmValue>,
    pub nodes: Option<SlurmValue>,
    pub ntasks: Option<SlurmValue>,
    pub cpus_per_task: Option<SlurmValue>,
    pub partition: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    pub job_name: Option<String>,
    /// Log file template; `{session}` and `{user}` are substituted per job.
    pub output: Option<String>,
    pub mail_user: Option<String>,
    pub mail_type: Option<String>,
}

impl SlurmArgs {
    pub fn log_path(&self, user: &str, unit: &str) -> Option<String> {
        self.output
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|template| template.replace("{user}", user).replace("{session}", unit))
    }
}

/// How the sessions to convert were specified.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSelector {
    Explicit(Vec<String>),
    Project {
        project: String,
        subjects: Vec<String>,
    },
}

/// Fully merged and validated configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub slurm: SlurmArgs,
    pub tool: ToolArgs,
    pub import: ToolArgs,
    /// Session override blocks in file order.
    pub overrides: Vec<(String, ToolArgs)>,
    pub selector: Option<SessionSelector>,
}

impl LauncherConfig {
    /// Built-in defaults layered with the optional user file.
    pub fn load(user_path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = parse_document("built-in defaults", DEFAULT_CONFIG)?;
        let user = match user_path {
            Some(path) => Some(load_document(path)?),
            None => None,
        };
        Self::from_merged(&merge(&defaults, user.as_ref()))
    }

    pub fn from_merged(merged: &Table) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let section = |name: &str, errors: &mut Vec<ConfigError>| -> Table {
            match merged.get(name) {
                Some(Value::Table(t)) => t.clone(),
                Some(_) => {
                    errors.push(ConfigError::WrongKind {
                        section: "<root>".into(),
                        key: name.into(),
                        expected: "a [section] table",
                    });
                    Table::new()
                }
                None => Table::new(),
            }
        };

        let slurm_table = section(SLURM_SECTION, &mut errors);
        let slurm = match Value::Table(slurm_table).try_into::<SlurmArgs>() {
            Ok(slurm) => slurm,
            Err(err) => {
                errors.push(ConfigError::Scheduler(err.message().to_string()));
                SlurmArgs::default()
            }
        };
        if let Some(output) = slurm.output.as_deref() {
            if !output.is_empty() && !output.contains("{session}") {
                errors.push(ConfigError::Scheduler(format!(
                    "output `{}` must contain {{session}} so jobs do not share a log file",
                    output
                )));
            }
        }

        let tool = typed_section(
            &XNAT2BIDS,
            &section(XNAT2BIDS.section, &mut errors),
            true,
            &mut errors,
        );
        let import = typed_section(
            &DICOM_IMPORT,
            &section(DICOM_IMPORT.section, &mut errors),
            true,
            &mut errors,
        );

        let mut overrides = Vec::new();
        for (name, value) in merged {
            if is_reserved_section(name) {
                continue;
            }
            match value {
                Value::Table(block) => {
                    let args = typed_section(&XNAT2BIDS, block, false, &mut errors);
                    tracing::trace!(session = %name, keys = args.len(), "session override block");
                    overrides.push((name.clone(), args));
                }
                _ => errors.push(ConfigError::WrongKind {
                    section: "<root>".into(),
                    key: name.clone(),
                    expected: "a [section] table",
                }),
            }
        }

        let selector = match session_selector(&tool) {
            Ok(selector) => selector,
            Err(mut found) => {
                errors.append(&mut found);
                None
            }
        };

        ConfigError::collect(errors)?;

        Ok(LauncherConfig {
            slurm,
            tool,
            import,
            overrides,
            selector,
        })
    }

    /// Tool arguments for one session: merged config, then that session's override block.
    pub fn resolve_session(&self, base: &ToolArgs, session_id: &str) -> ToolArgs {
        match self.overrides.iter().find(|(name, _)| name == session_id) {
            Some((_, block)) => base.layered(block),
            None => base.clone(),
        }
    }
}

fn typed_section(
    schema: &ToolSchema,
    table: &Table,
    allow_reserved: bool,
    errors: &mut Vec<ConfigError>,
) -> ToolArgs {
    let section_name = if allow_reserved { schema.section } else { "session override" };
    match ToolArgs::from_table(schema, section_name, table, allow_reserved) {
        Ok(args) => args,
        Err(mut found) => {
            errors.append(&mut found);
            ToolArgs::new()
        }
    }
}

fn is_reserved_section(name: &str) -> bool {
    name == SLURM_SECTION || name == XNAT2BIDS.section || name == DICOM_IMPORT.section
}

/// Work out how sessions were selected, rejecting contradictory combinations.
pub fn session_selector(tool: &ToolArgs) -> Result<Option<SessionSelector>, Vec<ConfigError>> {
    let list = |key: &str| match tool.get(key) {
        Some(ParamValue::List(items)) if !items.is_empty() => Some(items.clone()),
        _ => None,
    };
    let sessions = list("sessions");
    let subjects = list("subjects");
    let project = tool.text("project").map(str::to_string);

    let mut errors = Vec::new();
    for (key, items) in [("sessions", &sessions), ("subjects", &subjects)] {
        if let Some(items) = items {
            let duplicates = duplicates(items);
            if !duplicates.is_empty() {
                errors.push(ConfigError::Duplicates {
                    key: key.to_string(),
                    duplicates,
                });
            }
        }
    }

    if sessions.is_some() && subjects.is_some() {
        errors.push(ConfigError::Selection(
            "`subjects` and `sessions` cannot both be set; list sessions or select by project/subjects"
                .into(),
        ));
    } else if sessions.is_some() && project.is_some() {
        errors.push(ConfigError::Selection(
            "`project` and `sessions` cannot both be set".into(),
        ));
    }
    if subjects.is_some() && project.is_none() {
        errors.push(ConfigError::Selection(
            "`subjects` requires `project` to be set".into(),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(match (sessions, project) {
        (Some(sessions), _) => Some(SessionSelector::Explicit(sessions)),
        (None, Some(project)) => Some(SessionSelector::Project {
            project,
            subjects: subjects.unwrap_or_default(),
        }),
        (None, None) => None,
    })
}

fn duplicates(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut reported = Vec::new();
    for item in items {
        if !seen.insert(item.as_str()) && !reported.contains(item) {
            reported.push(item.clone());
        }
    }
    reported
}

pub fn parse_document(origin: &str, text: &str) -> Result<Table, ConfigError> {
    text.parse::<Table>().map_err(|err| ConfigError::Parse {
        origin: origin.to_string(),
        message: err.message().to_string(),
    })
}

pub fn load_document(path: &Path) -> Result<Table, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_document(&path.display().to_string(), &text)
}

/// Layer `user` over `defaults` without touching either input.
///
/// Keys of the argument sections are merged one by one; every other user section
/// is a session override block and is copied through as-is.
pub fn merge(defaults: &Table, user: Option<&Table>) -> Table {
    let mut merged = defaults.clone();
    let Some(user) = user else {
        return merged;
    };

    for (name, value) in user {
        match (merged.get_mut(name), value) {
            (Some(Value::Table(base)), Value::Table(layer)) if is_reserved_section(name) => {
                for (key, v) in layer {
                    base.insert(key.clone(), v.clone());
                }
            }
            _ => {
                merged.insert(name.clone(), value.clone());
            }
        }
    }
    merged
}
