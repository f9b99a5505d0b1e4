//
// schema.rs
// xnat2bids-launcher
//
// Static parameter tables for the containerized tools the launcher drives.
//
// Thales Matheus Mendonça Santos - November 2025

/// How a configured value is turned into command-line tokens.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ParamKind {
    /// `--name value`
    Value,
    /// `--name v` once per element; strings accept comma lists and `a-b` ranges.
    MultiValue,
    /// `--name` when truthy.
    Flag,
    /// `--name` repeated N times.
    RepeatedFlag,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ParamDescriptor {
    pub name: &'static str,
    pub kind: ParamKind,
    pub requires_binding: bool,
}

const fn param(name: &'static str, kind: ParamKind, requires_binding: bool) -> ParamDescriptor {
    ParamDescriptor {
        name,
        kind,
        requires_binding,
    }
}

/// Flag carrying the XNAT password; its value is redacted from every log line.
pub const CREDENTIAL_FLAG: &str = "--pass";

/// A tool the launcher knows how to compile arguments for.
#[derive(Debug, Copy, Clone)]
pub struct ToolSchema {
    /// Executable invoked inside the container.
    pub command: &'static str,
    /// Top-level configuration section holding this tool's arguments.
    pub section: &'static str,
    /// Key emitted as the second positional argument (and bound) when set.
    pub output_root: &'static str,
    /// Selection and image keys consumed by the launcher, never forwarded.
    pub reserved: &'static [&'static str],
    pub params: &'static [ParamDescriptor],
}

impl ToolSchema {
    pub fn lookup(&self, name: &str) -> Option<&'static ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains(&name)
    }

    /// Every key accepted in this tool's configuration section.
    pub fn known_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params
            .iter()
            .map(|p| p.name)
            .chain(self.reserved.iter().copied())
    }
}

pub const XNAT2BIDS: ToolSchema = ToolSchema {
    command: "xnat2bids",
    section: "xnat2bids-args",
    output_root: "bids_root",
    reserved: &["sessions", "project", "subjects", "version"],
    params: &[
        param("bids_root", ParamKind::Value, true),
        param("host", ParamKind::Value, false),
        param("user", ParamKind::Value, false),
        param("session-suffix", ParamKind::Value, false),
        param("bidsmap-file", ParamKind::Value, true),
        param("includeseq", ParamKind::MultiValue, false),
        param("skipseq", ParamKind::MultiValue, false),
        param("log-id", ParamKind::Value, false),
        param("correct-dicoms-config", ParamKind::Value, true),
        param("verbose", ParamKind::RepeatedFlag, false),
        param("overwrite", ParamKind::Flag, false),
        param("cleanup", ParamKind::Flag, false),
        param("export-only", ParamKind::Flag, false),
        param("skip-export", ParamKind::Flag, false),
        param("validate-frames", ParamKind::Flag, false),
    ],
};

pub const DICOM_IMPORT: ToolSchema = ToolSchema {
    command: "dicom-import",
    section: "dicom-import-args",
    output_root: "data_dir",
    reserved: &["project", "version"],
    params: &[
        param("data_dir", ParamKind::Value, true),
        param("host", ParamKind::Value, false),
        param("user", ParamKind::Value, false),
        param("subject", ParamKind::Value, false),
        param("session", ParamKind::Value, false),
        param("scan-type", ParamKind::MultiValue, false),
        param("log-file", ParamKind::Value, true),
        param("verbose", ParamKind::RepeatedFlag, false),
        param("overwrite", ParamKind::Flag, false),
        param("anonymize", ParamKind::Flag, false),
    ],
};
