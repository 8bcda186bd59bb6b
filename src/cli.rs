//! Command-line interface definition.
//!
//! All argument parsing lives here so the rest of the codebase can stay
//! agnostic to `clap`.  `Cli` is parsed once in `main`, validated into an
//! immutable [`Options`], and that is what the flows receive.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::error::RunError;

/// Top-level CLI arguments.
#[derive(Parser, Debug)]
#[command(
    name    = "nuckie-backup",
    about   = "Back up Nuckie to the NAS, or restore it from a previous backup",
    version,
    help_template = "\
{before-help}{name} {version}
{about}

{usage-heading} {usage}

{all-args}{after-help}"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// `backup` or `restore`.
    #[arg(value_name = "COMMAND")]
    pub command: Option<String>,

    /// Log every command line and show captured output of successful stages.
    #[arg(short, long)]
    pub verbose: bool,

    /// cloud-init user-data embedded in the autoinstall image.  Required for
    /// `backup`.
    #[arg(short, long, value_name = "PATH")]
    pub user_data: Option<PathBuf>,

    /// Do not archive (or restore) /home.
    #[arg(short = 'm', long)]
    pub skip_home: bool,

    /// Do not archive (or restore) the system directories.
    #[arg(short = 'r', long)]
    pub skip_root: bool,

    /// Skip both archives; only accounts and packages are handled.
    #[arg(short = 't', long)]
    pub skip_all: bool,

    /// Do not build the autoinstall image during `backup`.
    #[arg(short = 'i', long)]
    pub skip_iso: bool,

    /// Site configuration file.
    ///
    /// Defaults to `/etc/nuckie-backup/config.toml` when present, otherwise
    /// the built-in settings are used.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

// ─── Mode ─────────────────────────────────────────────────────────────────────

/// Which flow a run executes.  Chosen once from the positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Backup,
    Restore,
}

impl Mode {
    /// Classify the command token.  Anything but the two exact names is a
    /// usage error.
    pub fn from_token(token: Option<&str>) -> Result<Self, RunError> {
        match token {
            Some("backup") => Ok(Self::Backup),
            Some("restore") => Ok(Self::Restore),
            Some(other) => Err(RunError::UnknownCommand(other.to_string())),
            None => Err(RunError::MissingCommand),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        }
    }
}

// ─── Options ──────────────────────────────────────────────────────────────────

/// Validated, immutable run configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct Options {
    pub mode: Mode,
    pub verbose: bool,
    pub skip_home: bool,
    pub skip_root: bool,
    pub skip_iso: bool,
    pub user_data: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl Options {
    /// Build options from parsed arguments, rejecting an unknown mode.
    ///
    /// `--skip-all` is folded into `skip_home` and `skip_root` here so no flow
    /// has to look at three flags.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mode = Mode::from_token(cli.command.as_deref())?;

        Ok(Self {
            mode,
            verbose: cli.verbose,
            skip_home: cli.skip_home || cli.skip_all,
            skip_root: cli.skip_root || cli.skip_all,
            skip_iso: cli.skip_iso,
            user_data: cli.user_data.clone(),
            config: cli.config.clone(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
