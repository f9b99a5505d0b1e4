//
// compile.rs
// xnat2bids-launcher
//
// Turns resolved tool arguments into an argument vector plus the bind paths its container needs,
// and the typed [slurm-args] record into scheduler directives.
//
// Thales Matheus Mendonça Santos - November 2025

use std::collections::BTreeSet;

use crate::config::{ParamValue, SlurmArgs, ToolArgs};
use crate::error::ConfigError;
use crate::schema::{ParamDescriptor, ParamKind, ToolSchema};

/// Compiled tool invocation for one unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArgs {
    pub arguments: Vec<String>,
    pub bind_paths: BTreeSet<String>,
}

/// Compile `args` for `unit_id` (a session accession id, or a project for imports).
///
/// `arguments[0]` is always `unit_id`; `arguments[1]` is the output root when one is set.
/// Everything else follows the insertion order of `args`.
pub fn compile(schema: &ToolSchema, args: &ToolArgs, unit_id: &str) -> Result<CompiledArgs, ConfigError> {
    let mut arguments = vec![unit_id.to_string()];
    let mut bind_paths = BTreeSet::new();

    if let Some(root) = args.text(schema.output_root) {
        arguments.push(root.to_string());
        bind_paths.insert(root.to_string());
    }

    for (name, value) in args.iter() {
        if name == schema.output_root || schema.is_reserved(name) || value.is_empty() {
            continue;
        }
        let descriptor = schema.lookup(name).ok_or_else(|| ConfigError::UnknownKey {
            section: schema.section.to_string(),
            key: name.to_string(),
            suggestion: None,
        })?;

        arguments.extend(extract_params(descriptor, value)?);

        if descriptor.requires_binding {
            match value {
                ParamValue::List(items) => bind_paths.extend(items.iter().cloned()),
                other => {
                    bind_paths.insert(other.to_string());
                }
            }
        }
    }

    Ok(CompiledArgs {
        arguments,
        bind_paths,
    })
}

/// Command-line tokens for a single parameter.
pub fn extract_params(descriptor: &ParamDescriptor, value: &ParamValue) -> Result<Vec<String>, ConfigError> {
    let flag = format!("--{}", descriptor.name);
    if value.is_empty() {
        return Ok(Vec::new());
    }

    let tokens = match descriptor.kind {
        ParamKind::Value => vec![flag, value.to_string()],
        ParamKind::MultiValue => {
            let values = match value {
                ParamValue::List(items) => items.clone(),
                ParamValue::Text(text) => expand_ranges(descriptor.name, text)?,
                other => vec![other.to_string()],
            };
            values
                .into_iter()
                .flat_map(|v| [flag.clone(), v])
                .collect()
        }
        ParamKind::Flag => match value {
            ParamValue::Bool(true) => vec![flag],
            ParamValue::Int(n) if *n > 0 => vec![flag],
            _ => Vec::new(),
        },
        ParamKind::RepeatedFlag => {
            let count = match value {
                ParamValue::Int(n) => (*n).max(0) as usize,
                ParamValue::Bool(true) => 1,
                _ => 0,
            };
            vec![flag; count]
        }
    };
    Ok(tokens)
}

/// Widest `a-b` range accepted; series numbers never come close.
pub const MAX_RANGE_SPAN: u32 = 10_000;

/// Expand `"1-4,7,10"` into `["1", "2", "3", "4", "7", "10"]`.
pub fn expand_ranges(param: &str, text: &str) -> Result<Vec<String>, ConfigError> {
    let mut values = Vec::new();
    for token in text.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.split_once('-') {
            Some((start, end)) => {
                let invalid = || ConfigError::InvalidRange {
                    param: param.to_string(),
                    token: token.to_string(),
                };
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end || end - start >= MAX_RANGE_SPAN {
                    return Err(invalid());
                }
                values.extend((start..=end).map(|n| n.to_string()));
            }
            None => values.push(token.to_string()),
        }
    }
    Ok(values)
}

/// Scheduler directives for one job, in the field order of [`SlurmArgs`].
pub fn scheduler_directives(slurm: &SlurmArgs, job_name: &str, log_path: Option<&str>) -> Vec<String> {
    let mut directives = Vec::new();
    let mut push = |flag: &str, value: String| {
        if !value.is_empty() {
            directives.push(format!("--{}", flag));
            directives.push(value);
        }
    };

    let scalars = [
        ("time", &slurm.time),
        ("mem", &slurm.mem),
        ("nodes", &slurm.nodes),
        ("ntasks", &slurm.ntasks),
        ("cpus-per-task", &slurm.cpus_per_task),
    ];
    for (flag, value) in scalars {
        if let Some(value) = value {
            push(flag, value.to_string());
        }
    }

    let texts = [
        ("partition", &slurm.partition),
        ("account", &slurm.account),
        ("qos", &slurm.qos),
    ];
    for (flag, value) in texts {
        if let Some(value) = value {
            push(flag, value.clone());
        }
    }

    push("job-name", job_name.to_string());
    if let Some(path) = log_path {
        push("output", path.to_string());
    }
    if let Some(mail_user) = &slurm.mail_user {
        push("mail-user", mail_user.clone());
    }
    if let Some(mail_type) = &slurm.mail_type {
        push("mail-type", mail_type.clone());
    }

    directives
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlurmValue;
    use crate::schema::{DICOM_IMPORT, XNAT2BIDS};

    fn text(s: &str) -> ParamValue {
        ParamValue::Text(s.to_string())
    }

    fn scenario_args() -> ToolArgs {
        ToolArgs::new()
            .with(
                "sessions",
                ParamValue::List(vec!["E001".into(), "E002".into()]),
            )
            .with("bids_root", text("/out"))
            .with("overwrite", ParamValue::Bool(true))
            .with("verbose", ParamValue::Int(2))
    }

    #[test]
    fn scenario_compiles_positionals_then_flags() {
        let args = scenario_args();
        for session in ["E001", "E002"] {
            let compiled = compile(&XNAT2BIDS, &args, session).expect("compile");
            assert_eq!(
                compiled.arguments,
                vec![session, "/out", "--overwrite", "--verbose", "--verbose"]
            );
            assert_eq!(compiled.bind_paths, BTreeSet::from(["/out".to_string()]));
        }
    }

    #[test]
    fn compiling_twice_is_identical() {
        let args = scenario_args()
            .with("includeseq", text("1-3,8"))
            .with("bidsmap-file", text("/maps/bidsmap.json"));
        let first = compile(&XNAT2BIDS, &args, "E001").expect("first");
        let second = compile(&XNAT2BIDS, &args, "E001").expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn include_ranges_expand_inclusively() {
        let descriptor = XNAT2BIDS.lookup("includeseq").expect("includeseq");
        let tokens = extract_params(descriptor, &text("1-4,7,10")).expect("expand");
        assert_eq!(
            tokens.join(" "),
            "--includeseq 1 --includeseq 2 --includeseq 3 --includeseq 4 --includeseq 7 --includeseq 10"
        );
    }

    #[test]
    fn range_matches_explicit_list() {
        let descriptor = XNAT2BIDS.lookup("skipseq").expect("skipseq");
        let ranged = extract_params(descriptor, &text("1-3")).expect("range");
        let listed = extract_params(
            descriptor,
            &ParamValue::List(vec!["1".into(), "2".into(), "3".into()]),
        )
        .expect("list");
        assert_eq!(ranged, listed);
    }

    #[test]
    fn multi_digit_bounds_are_inclusive() {
        let values = expand_ranges("includeseq", "9-12").expect("expand");
        assert_eq!(values, vec!["9", "10", "11", "12"]);
    }

    #[test]
    fn malformed_ranges_are_rejected() {
        assert!(expand_ranges("includeseq", "5-2").is_err());
        assert!(expand_ranges("includeseq", "a-3").is_err());
        assert!(expand_ranges("includeseq", "3-").is_err());
    }

    #[test]
    fn oversized_ranges_are_rejected() {
        let err = expand_ranges("includeseq", "1-4000000000").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { ref token, .. } if token == "1-4000000000"));
        let widest = format!("1-{}", MAX_RANGE_SPAN);
        assert_eq!(expand_ranges("skipseq", &widest).expect("widest").len(), MAX_RANGE_SPAN as usize);
    }

    #[test]
    fn compiles_the_documented_launcher_example() {
        let args = ToolArgs::new()
            .with("sessions", ParamValue::List(vec!["XNAT_E00152".into()]))
            .with("bids_root", text("/gpfs/data/bnc/shared/bids-export/"))
            .with("host", text("https://xnat.bnc.brown.edu"))
            .with("bidsmap-file", text("/gpfs/data/bnc/shared/scripts/bidsmap.json"))
            .with("includeseq", ParamValue::List(vec!["1".into(), "2".into()]))
            .with("skipseq", text("3"))
            .with("overwrite", ParamValue::Bool(true));
        let compiled = compile(&XNAT2BIDS, &args, "XNAT_E00152").expect("compile");
        assert_eq!(
            compiled.arguments,
            vec![
                "XNAT_E00152",
                "/gpfs/data/bnc/shared/bids-export/",
                "--host",
                "https://xnat.bnc.brown.edu",
                "--bidsmap-file",
                "/gpfs/data/bnc/shared/scripts/bidsmap.json",
                "--includeseq",
                "1",
                "--includeseq",
                "2",
                "--skipseq",
                "3",
                "--overwrite",
            ]
        );
        assert_eq!(
            compiled.bind_paths,
            BTreeSet::from([
                "/gpfs/data/bnc/shared/bids-export/".to_string(),
                "/gpfs/data/bnc/shared/scripts/bidsmap.json".to_string(),
            ])
        );
    }

    #[test]
    fn dashed_flags_are_emitted_as_spelled() {
        let args = ToolArgs::new()
            .with("export-only", ParamValue::Bool(true))
            .with("session-suffix", text("pilot"));
        let compiled = compile(&XNAT2BIDS, &args, "E1").expect("compile");
        assert_eq!(
            compiled.arguments,
            vec!["E1", "--export-only", "--session-suffix", "pilot"]
        );
    }

    #[test]
    fn false_flags_and_empty_values_emit_nothing() {
        let args = ToolArgs::new()
            .with("overwrite", ParamValue::Bool(false))
            .with("verbose", ParamValue::Int(0))
            .with("host", text(""))
            .with("skipseq", ParamValue::List(Vec::new()));
        let compiled = compile(&XNAT2BIDS, &args, "E9").expect("compile");
        assert_eq!(compiled.arguments, vec!["E9"]);
        assert!(compiled.bind_paths.is_empty());
    }

    #[test]
    fn selection_keys_are_never_forwarded() {
        let args = ToolArgs::new()
            .with("project", text("sanes_sadlum"))
            .with("subjects", ParamValue::List(vec!["001".into()]))
            .with("version", text("1.2.0"))
            .with("host", text("https://xnat.example.org"));
        let compiled = compile(&XNAT2BIDS, &args, "E9").expect("compile");
        assert_eq!(
            compiled.arguments,
            vec!["E9", "--host", "https://xnat.example.org"]
        );
    }

    #[test]
    fn every_emitted_flag_is_a_schema_param() {
        let args = scenario_args()
            .with("includeseq", text("1-2"))
            .with("bidsmap-file", text("/maps/b.json"))
            .with("host", text("https://xnat"));
        let compiled = compile(&XNAT2BIDS, &args, "E1").expect("compile");
        for token in compiled.arguments.iter().filter(|t| t.starts_with("--")) {
            assert!(XNAT2BIDS.lookup(&token[2..]).is_some(), "{token}");
        }
    }

    #[test]
    fn bound_params_join_output_root() {
        let args = ToolArgs::new()
            .with("bids_root", text("/out"))
            .with("bidsmap-file", text("/maps/bidsmap.json"));
        let compiled = compile(&XNAT2BIDS, &args, "E1").expect("compile");
        assert_eq!(
            compiled.bind_paths,
            BTreeSet::from(["/maps/bidsmap.json".to_string(), "/out".to_string()])
        );
        assert_eq!(compiled.arguments[1], "/out");
    }

    #[test]
    fn unknown_key_fails_closed() {
        let args = ToolArgs::new().with("dicomdir", text("/tmp"));
        assert!(compile(&XNAT2BIDS, &args, "E1").is_err());
    }

    #[test]
    fn import_uses_its_own_schema() {
        let args = ToolArgs::new()
            .with("project", text("sanes_sadlum"))
            .with("data_dir", text("/data/dicoms"))
            .with("scan-type", text("3-4"))
            .with("anonymize", ParamValue::Bool(true));
        let compiled = compile(&DICOM_IMPORT, &args, "sanes_sadlum").expect("compile");
        assert_eq!(
            compiled.arguments,
            vec![
                "sanes_sadlum",
                "/data/dicoms",
                "--scan-type",
                "3",
                "--scan-type",
                "4",
                "--anonymize"
            ]
        );
        assert!(compiled.bind_paths.contains("/data/dicoms"));
    }

    #[test]
    fn directives_follow_field_order() {
        let slurm = SlurmArgs {
            time: Some(SlurmValue::Text("04:00:00".into())),
            mem: Some(SlurmValue::Int(16000)),
            mail_type: Some("ALL".into()),
            ..SlurmArgs::default()
        };
        let directives = scheduler_directives(&slurm, "xnat2bids", Some("/logs/E1.txt"));
        assert_eq!(
            directives,
            vec![
                "--time",
                "04:00:00",
                "--mem",
                "16000",
                "--job-name",
                "xnat2bids",
                "--output",
                "/logs/E1.txt",
                "--mail-type",
                "ALL"
            ]
        );
    }
}
