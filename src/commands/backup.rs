//! `nuckie-backup backup` — capture this host into a dated directory.
//!
//! # Pipeline stages (in order)
//!
//! | # | Stage             | Flag to skip   | On failure          |
//! |---|-------------------|----------------|---------------------|
//! | 1 | Distribution      | —              | abort               |
//! | 2 | Accounts          | —              | abort               |
//! | 3 | Packages          | —              | abort               |
//! | 4 | Package states    | —              | continue            |
//! | 5 | Root archive      | `-r`, `-t`     | continue            |
//! | 6 | Home archive      | `-m`, `-t`     | continue            |
//! | 7 | Tool copy         | —              | continue            |
//! | 8 | Image: …          | `-i`           | continue (image ends) |
//!
//! Stages 1–3 are what a restore cannot do without, so they stop the run.
//! Everything after them is best effort: the remaining stages still run and
//! the run exits non-zero listing what failed.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::{
    accounts,
    archive,
    cleanup::CleanupRegistry,
    cli::Options,
    config::Config,
    error::RunError,
    iso::{self, ImageJob},
    manifest, runner,
    ui::{
        StageOutcome, failed_labels, print_summary, record, run_captured, run_stage, run_task,
        skipped_stage,
    },
};

const PACKAGE_STATES: [&str; 3] = ["auto", "manual", "hold"];

/// Where this run writes.
pub struct Target<'a> {
    pub mount_point: &'a Path,
    pub dir: &'a Path,
    pub date: NaiveDate,
}

fn abort(outcomes: &[StageOutcome], stage: &str) -> Result<()> {
    print_summary("Backup", outcomes);
    Err(RunError::StageFailed(stage.into()).into())
}

/// Execute the backup pipeline into `target.dir`.
pub fn run(
    opts: &Options,
    cfg: &Config,
    target: &Target<'_>,
    registry: &CleanupRegistry,
) -> Result<()> {
    println!();
    println!("  Backing up to {}", target.dir.display());
    println!();

    let mut outcomes: Vec<StageOutcome> = Vec::new();

    // 1–3. Required artifacts
    let distribution = run_task("Distribution", || {
        write_distribution(&cfg.paths.etc_dir, target.dir)
    });
    if record(&mut outcomes, distribution) {
        return abort(&outcomes, "Distribution");
    }

    let accounts = run_task("Accounts", || {
        let n = accounts::extract(&cfg.paths.etc_dir, target.dir, cfg.accounts.min_id)?;
        Ok(format!(
            "{} users, {} groups, {} shadow entries",
            n.users, n.groups, n.shadow
        ))
    });
    if record(&mut outcomes, accounts) {
        return abort(&outcomes, "Accounts");
    }

    let clone = run_stage(
        "Packages",
        &runner::apt_clone_args(&target.dir.join(manifest::PACKAGES)),
    );
    if record(&mut outcomes, clone) {
        return abort(&outcomes, "Packages");
    }

    // 4. Package states
    record(
        &mut outcomes,
        run_task("Package states", || write_package_states(target.dir)),
    );

    // 5 & 6. Archives
    let planned = archive::plan(opts, &cfg.archive, target.mount_point);
    for label in [archive::ROOT_LABEL, archive::HOME_LABEL] {
        let outcome = match planned.iter().find(|s| s.label == label) {
            Some(spec) => run_stage(
                spec.label,
                &runner::tar_create_args(spec, &target.dir.join(spec.file_name)),
            ),
            None => skipped_stage(label),
        };
        record(&mut outcomes, outcome);
    }

    // 7. Tool copy
    record(
        &mut outcomes,
        run_task("Tool copy", || copy_tool(target.dir)),
    );

    // 8. Autoinstall image
    if opts.skip_iso {
        record(&mut outcomes, skipped_stage("Autoinstall image"));
    } else {
        match (opts.user_data.as_deref(), std::env::current_exe()) {
            (Some(user_data), Ok(tool)) => {
                let job = ImageJob {
                    cfg: &cfg.iso,
                    user_data,
                    tool: &tool,
                    work_dir: &cfg.paths.work_dir,
                    output: target.dir.join(manifest::iso_name(target.date)),
                };
                iso::build(&job, registry, &mut outcomes);
            },
            (None, _) => {
                record(
                    &mut outcomes,
                    StageOutcome::from_result(
                        "Autoinstall image",
                        Err(RunError::UserDataRequired.into()),
                    ),
                );
            },
            (_, Err(e)) => {
                record(
                    &mut outcomes,
                    StageOutcome::from_result(
                        "Autoinstall image",
                        Err(anyhow::Error::new(e).context("locating this executable")),
                    ),
                );
            },
        }
    }

    print_summary("Backup", &outcomes);

    let failed = failed_labels(&outcomes);
    if failed.is_empty() {
        tracing::info!("backup written to {}", target.dir.display());
        Ok(())
    } else {
        Err(RunError::Partial {
            mode: "backup",
            stages: failed,
        }
        .into())
    }
}

// ─── In-process stages ────────────────────────────────────────────────────────

/// `distribution.desc` is a verbatim copy of `os-release`.
pub fn write_distribution(etc_dir: &Path, dir: &Path) -> Result<String> {
    let src = etc_dir.join("os-release");
    let text =
        std::fs::read_to_string(&src).with_context(|| format!("reading {}", src.display()))?;
    let dest = dir.join(manifest::DISTRIBUTION);
    std::fs::write(&dest, &text).with_context(|| format!("writing {}", dest.display()))?;
    Ok(pretty_name(&text).unwrap_or_default())
}

/// `PRETTY_NAME` from an os-release file, unquoted.
pub fn pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|l| {
        l.strip_prefix("PRETTY_NAME=")
            .map(|v| v.trim().trim_matches('"').to_string())
    })
}

fn write_package_states(dir: &Path) -> Result<String> {
    let mut counts = Vec::with_capacity(PACKAGE_STATES.len());
    for state in PACKAGE_STATES {
        let (ok, stdout, stderr) = run_captured(&runner::apt_mark_args(state))?;
        if !ok {
            anyhow::bail!("apt-mark show{state}: {}", stderr.trim());
        }
        let dest = dir.join(manifest::package_state_file(state));
        std::fs::write(&dest, &stdout).with_context(|| format!("writing {}", dest.display()))?;
        counts.push(format!("{} {state}", stdout.lines().count()));
    }
    Ok(counts.join(", "))
}

fn copy_tool(dir: &Path) -> Result<String> {
    let exe = std::env::current_exe().context("locating this executable")?;
    let dest = dir.join(manifest::TOOL_COPY);
    std::fs::copy(&exe, &dest)
        .with_context(|| format!("copying {} to {}", exe.display(), dest.display()))?;
    Ok(dest.display().to_string())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const OS_RELEASE: &str = "\
NAME=\"Ubuntu\"
VERSION=\"20.04.6 LTS (Focal Fossa)\"
ID=ubuntu
PRETTY_NAME=\"Ubuntu 20.04.6 LTS\"
VERSION_ID=\"20.04\"
";

    #[test]
    fn pretty_name_is_unquoted() {
        assert_eq!(pretty_name(OS_RELEASE).as_deref(), Some("Ubuntu 20.04.6 LTS"));
        assert_eq!(pretty_name("ID=debian\n"), None);
    }

    #[test]
    fn distribution_is_copied_verbatim() {
        let etc = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        fs::write(etc.path().join("os-release"), OS_RELEASE).unwrap();

        let msg = write_distribution(etc.path(), dir.path()).unwrap();
        assert_eq!(msg, "Ubuntu 20.04.6 LTS");
        assert_eq!(
            fs::read_to_string(dir.path().join("distribution.desc")).unwrap(),
            OS_RELEASE
        );
    }

    #[test]
    fn distribution_fails_without_os_release() {
        let etc = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(write_distribution(etc.path(), dir.path()).is_err());
    }

    #[test]
    fn tool_copy_lands_in_backup_dir() {
        let dir = tempfile::tempdir().unwrap();
        copy_tool(dir.path()).unwrap();
        assert!(dir.path().join("nuckie-backup").is_file());
    }
}
