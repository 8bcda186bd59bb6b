//! `nuckie-backup restore` — put a previous backup back onto this host.
//!
//! # Flow
//!
//! 1. List the dated backup directories on the share (oldest first).
//! 2. Ask which one; an empty answer picks the latest date.
//! 3. Ask for the literal [`CONFIRMATION`].  Anything else aborts untouched.
//! 4. Check every artifact the restore will read is present.
//! 5. Restore: users, groups, passwords, packages, root archive, home archive.
//!
//! Nothing is written before step 5.  From then on each stage runs even if an
//! earlier one failed, so as much of the system comes back as possible; the
//! run exits non-zero listing what failed.

use std::{
    io::{BufRead, Write},
    path::Path,
};

use anyhow::{Context, Result};

use crate::{
    accounts,
    archive::{HOME_LABEL, ROOT_LABEL},
    cli::Options,
    config::Config,
    error::RunError,
    manifest::{self, ManifestDir},
    runner,
    ui::{StageOutcome, failed_labels, print_summary, record, run_stage, run_task, skipped_stage},
};

/// What the operator must type, exactly, to go ahead.
pub const CONFIRMATION: &str = "YES";

// ─── Prompts ──────────────────────────────────────────────────────────────────

/// One line from `input` without its line ending; `None` at end of input.
fn read_answer(input: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line).context("reading answer")? == 0 {
        return Ok(None);
    }
    let trimmed = line.strip_suffix('\n').unwrap_or(&line);
    let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
    Ok(Some(trimmed.to_string()))
}

/// Resolve the operator's answer to a backup directory.
///
/// Accepts a 1-based index into `backups` or a directory name.  Empty picks
/// the last entry, which is the latest date since [`manifest::list`] sorts
/// by date.
pub fn choose<'a>(backups: &'a [ManifestDir], answer: &str) -> Result<&'a ManifestDir> {
    let answer = answer.trim();
    if answer.is_empty() {
        return backups
            .last()
            .ok_or_else(|| RunError::InvalidSelection(String::new()).into());
    }

    if let Ok(n) = answer.parse::<usize>() {
        if let Some(m) = n.checked_sub(1).and_then(|i| backups.get(i)) {
            return Ok(m);
        }
    }

    backups
        .iter()
        .find(|m| m.name() == answer)
        .ok_or_else(|| RunError::InvalidSelection(answer.to_string()).into())
}

pub fn is_confirmed(answer: Option<&str>) -> bool {
    answer == Some(CONFIRMATION)
}

fn prompt_selection<'a>(
    backups: &'a [ManifestDir],
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<&'a ManifestDir> {
    writeln!(out, "\n  Available backups:\n")?;
    for (i, m) in backups.iter().enumerate() {
        writeln!(out, "    {:>3}  {}", i + 1, m.name())?;
    }
    let default = backups.last().map(ManifestDir::name).unwrap_or_default();
    write!(out, "\n  Restore which backup? [{default}] ")?;
    out.flush()?;

    let answer = read_answer(input)?.unwrap_or_default();
    choose(backups, &answer)
}

fn prompt_confirmation(
    chosen: &ManifestDir,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    writeln!(
        out,
        "\n  This appends accounts to the live system, reinstalls packages and\n  \
         extracts {} over the filesystem.",
        chosen.name()
    )?;
    write!(out, "  Type {CONFIRMATION} to continue: ")?;
    out.flush()?;

    let answer = read_answer(input)?;
    if is_confirmed(answer.as_deref()) {
        Ok(())
    } else {
        Err(RunError::NotConfirmed.into())
    }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

/// Execute the restore flow against the share mounted at `mount_point`.
pub fn run(
    opts: &Options,
    cfg: &Config,
    mount_point: &Path,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<()> {
    let backups = manifest::list(mount_point)?;
    if backups.is_empty() {
        return Err(RunError::NoBackups(mount_point.to_path_buf()).into());
    }

    let chosen = prompt_selection(&backups, input, out)?;
    prompt_confirmation(chosen, input, out)?;

    let dir = chosen.path.as_path();
    manifest::verify(
        dir,
        &manifest::required_artifacts(opts.skip_root, opts.skip_home),
    )?;
    warn_on_distribution_mismatch(dir, &cfg.paths.etc_dir);

    tracing::info!("restoring from {}", dir.display());
    println!();

    let mut outcomes: Vec<StageOutcome> = Vec::new();
    let etc = &cfg.paths.etc_dir;

    for (label, live, backup) in [
        ("Users", "passwd", manifest::PASSWD),
        ("Groups", "group", manifest::GROUP),
        ("Passwords", "shadow", manifest::SHADOW),
    ] {
        let outcome = run_task(label, || {
            let n = accounts::merge_into(&etc.join(live), &dir.join(backup))?;
            Ok(format!("{n} records appended to {live}"))
        });
        record(&mut outcomes, outcome);
    }

    record(
        &mut outcomes,
        run_stage(
            "Packages",
            &runner::apt_clone_restore_args(&dir.join(manifest::package_archive())),
        ),
    );

    for (label, file, skipped) in [
        (ROOT_LABEL, manifest::ROOT_ARCHIVE, opts.skip_root),
        (HOME_LABEL, manifest::HOME_ARCHIVE, opts.skip_home),
    ] {
        let outcome = if skipped {
            skipped_stage(label)
        } else {
            run_stage(
                label,
                &runner::tar_extract_args(&dir.join(file), &cfg.paths.restore_root),
            )
        };
        record(&mut outcomes, outcome);
    }

    print_summary("Restore", &outcomes);

    let failed = failed_labels(&outcomes);
    if failed.is_empty() {
        Ok(())
    } else {
        Err(RunError::Partial {
            mode: "restore",
            stages: failed,
        }
        .into())
    }
}

/// A backup from another release usually restores badly; say so, but let
/// the operator's confirmation stand.
fn warn_on_distribution_mismatch(dir: &Path, etc_dir: &Path) {
    let saved = std::fs::read_to_string(dir.join(manifest::DISTRIBUTION));
    let live = std::fs::read_to_string(etc_dir.join("os-release"));
    if let (Ok(saved), Ok(live)) = (saved, live) {
        let name = super::backup::pretty_name;
        if name(&saved) != name(&live) {
            tracing::warn!(
                "backup was taken on {} but this host runs {}",
                name(&saved).unwrap_or_else(|| "an unknown release".into()),
                name(&live).unwrap_or_else(|| "an unknown release".into())
            );
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
