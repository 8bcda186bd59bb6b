//! Named failure conditions.
//!
//! Flows propagate `anyhow::Error`; every *fatal* condition the operator can
//! hit is one of the variants below so that tests (and `main`) can tell them
//! apart with `downcast_ref`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    // ── usage ─────────────────────────────────────────────────────────────────
    #[error("no command given; expected `backup` or `restore`")]
    MissingCommand,

    #[error("unrecognised command '{0}'; expected `backup` or `restore`")]
    UnknownCommand(String),

    // ── preconditions ─────────────────────────────────────────────────────────
    #[error("must be run as root (effective uid is {0})")]
    NotRoot(u32),

    #[error("required tools not found on PATH: {}", .0.join(", "))]
    MissingTools(Vec<String>),

    #[error("backup needs a user-data file (-u/--user-data <path>)")]
    UserDataRequired,

    #[error("user-data file '{path}' is not readable: {source}")]
    UserDataUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── mount ─────────────────────────────────────────────────────────────────
    #[error("could not mount {share} at {target}: {reason}")]
    Mount {
        share: String,
        target: PathBuf,
        reason: String,
    },

    // ── restore validation ────────────────────────────────────────────────────
    #[error("no backups found under {0}")]
    NoBackups(PathBuf),

    #[error("invalid backup selection '{0}'")]
    InvalidSelection(String),

    #[error("restore not confirmed; nothing was changed")]
    NotConfirmed,

    #[error("backup {dir} is missing: {}", .missing.join(", "))]
    MissingArtifacts { dir: PathBuf, missing: Vec<String> },

    // ── stages ────────────────────────────────────────────────────────────────
    #[error("{0} failed; aborting")]
    StageFailed(String),

    #[error("{mode} finished with failed stages: {}", .stages.join(", "))]
    Partial {
        mode: &'static str,
        stages: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tools_lists_every_tool() {
        let e = RunError::MissingTools(vec!["7z".into(), "mkisofs".into()]);
        assert_eq!(e.to_string(), "required tools not found on PATH: 7z, mkisofs");
    }

    #[test]
    fn partial_names_failed_stages() {
        let e = RunError::Partial {
            mode: "restore",
            stages: vec!["Root archive".into(), "Home archive".into()],
        };
        assert_eq!(
            e.to_string(),
            "restore finished with failed stages: Root archive, Home archive"
        );
    }
}
