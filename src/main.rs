//! `nuckie-backup` — back up the Nuckie server to the NAS and rebuild it.
//!
//! # Overview
//!
//! `backup` writes one dated directory on the NAS share holding everything
//! needed to bring the host back: account records, a package clone, archives
//! of the system and home trees, and a bootable autoinstall image.
//! `restore` picks one of those directories and applies it to a freshly
//! installed host.
//!
//! # Usage
//!
//! ```text
//! nuckie-backup backup -u user-data.yaml     # everything
//! nuckie-backup backup -u user-data.yaml -m  # no /home archive
//! nuckie-backup backup -u user-data.yaml -t  # accounts and packages only
//! nuckie-backup restore                      # choose a backup and apply it
//! ```
//!
//! # Module layout
//!
//! | Module                   | Responsibility                                |
//! |--------------------------|-----------------------------------------------|
//! | [`cli`]                  | Argument types, `Mode`, validated `Options`   |
//! | [`config`]               | `Config` struct + TOML loader                 |
//! | [`error`]                | Named fatal conditions                        |
//! | [`logging`]              | tracing subscriber                            |
//! | [`preflight`]            | Root, tool and user-data checks               |
//! | [`cleanup`]              | Release mounts and scratch dirs on signals    |
//! | [`mount`]                | Scoped share mount                            |
//! | [`manifest`]             | Backup directory layout                       |
//! | [`accounts`]             | passwd/group/shadow filtering and merging     |
//! | [`archive`]              | Archive specs and exclusion rules             |
//! | [`iso`]                  | Autoinstall image construction                |
//! | [`runner`]               | Argument construction helpers                 |
//! | [`ui`]                   | Spinner, captured execution, stage output     |
//! | [`commands::backup`]     | Backup flow                                   |
//! | [`commands::restore`]    | Restore flow                                  |

mod accounts;
mod archive;
mod cleanup;
mod cli;
mod commands;
mod config;
mod error;
mod iso;
mod logging;
mod manifest;
mod mount;
mod preflight;
mod runner;
mod ui;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Mode, Options};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help / --version land here too and are not failures.
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        },
    };

    let opts = match Options::from_cli(&cli) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    logging::init(opts.verbose);

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("{e:?}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// `ParseArgs → CheckPrivilegeAndTools → Mount → {Backup | Restore} → Cleanup`.
///
/// The mount guard lives in this frame, so every return path below (success
/// or error) unmounts on the way out.
fn run(opts: &Options) -> Result<()> {
    let cfg = config::load_config(opts.config.as_deref())?;

    preflight::check(opts)?;

    let registry = cleanup::CleanupRegistry::new();
    cleanup::install_signal_handler(&registry)?;

    let mounter = mount::SystemMounter;
    let share = mount::MountGuard::acquire(&mounter, &cfg.share, &cfg.paths.work_dir, &registry)?;

    match opts.mode {
        Mode::Backup => {
            let date = chrono::Local::now().date_naive();
            let dir = share.create_manifest_dir(date)?;
            let target = commands::backup::Target {
                mount_point: share.path(),
                dir: &dir,
                date,
            };
            commands::backup::run(opts, &cfg, &target, &registry)
        },
        Mode::Restore => {
            let stdin = std::io::stdin();
            commands::restore::run(
                opts,
                &cfg,
                share.path(),
                &mut stdin.lock(),
                &mut std::io::stdout(),
            )
        },
    }
}
