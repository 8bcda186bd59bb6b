//! Precondition checks, run before anything is mounted or written.
//!
//! 1. Effective uid must be 0.
//! 2. Every external tool the selected flow shells out to must be on `PATH`.
//! 3. `backup` needs a readable user-data file.

use std::{fs::File, path::Path};

use anyhow::Result;

use crate::{
    cli::{Mode, Options},
    error::RunError,
};

/// Tools every run needs.
const COMMON_TOOLS: &[&str] = &["mount", "umount", "tar", "gzip", "apt-clone"];

/// Tools needed only to capture state.
const BACKUP_TOOLS: &[&str] = &["apt-mark"];

/// Tools needed to build the autoinstall image.
const ISO_TOOLS: &[&str] = &["curl", "7z", "chmod", "mksquashfs", "mkisofs", "md5sum"];

/// External tools the run described by `opts` will invoke.
pub fn required_tools(opts: &Options) -> Vec<&'static str> {
    let mut tools = COMMON_TOOLS.to_vec();
    if opts.mode == Mode::Backup {
        tools.extend_from_slice(BACKUP_TOOLS);
        if !opts.skip_iso {
            tools.extend_from_slice(ISO_TOOLS);
        }
    }
    tools
}

/// Run every precondition check for `opts`.
pub fn check(opts: &Options) -> Result<()> {
    let euid = nix::unistd::geteuid();
    if !euid.is_root() {
        return Err(RunError::NotRoot(euid.as_raw()).into());
    }

    check_tools(&required_tools(opts), |t| which::which(t).is_ok())?;

    if opts.mode == Mode::Backup {
        check_user_data(opts.user_data.as_deref())?;
    }

    tracing::debug!("preconditions satisfied for {}", opts.mode.name());
    Ok(())
}

/// Fail with every tool `present` rejects, not just the first.
pub fn check_tools(tools: &[&str], present: impl Fn(&str) -> bool) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .copied()
        .filter(|&t| !present(t))
        .map(String::from)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RunError::MissingTools(missing).into())
    }
}

pub fn check_user_data(path: Option<&Path>) -> Result<()> {
    let path = path.ok_or(RunError::UserDataRequired)?;
    File::open(path).map_err(|source| RunError::UserDataUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
