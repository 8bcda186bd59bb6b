//! Scoped NAS share mounting.
//!
//! # How it works
//!
//! 1. A private (`0700`) directory is created under `[paths].work_dir`.
//! 2. The directory is registered with the [`CleanupRegistry`] *before* the
//!    mount happens, so an interrupt at any later point still releases it.
//! 3. `mount -t <fstype> [-o <options>] <source> <dir>` binds the share.
//!
//! The returned [`MountGuard`] unmounts and removes the directory when it is
//! dropped, on both the success and the error path.  If a mount fails the
//! directory is removed straight away and no guard is returned.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

use crate::{
    cleanup::{CleanupRegistry, release_mount_point},
    config::ShareConfig,
    error::RunError,
    manifest,
};

// ─── Mounter seam ─────────────────────────────────────────────────────────────

/// Mounting and unmounting a share.
pub trait Mounter {
    fn mount(&self, share: &ShareConfig, target: &Path) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;
}

/// The real thing: shells out to `mount` / `umount`.
#[derive(Debug, Default)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn mount(&self, share: &ShareConfig, target: &Path) -> Result<()> {
        let args = crate::runner::mount_args(share, target);
        let (ok, _stdout, stderr) = crate::ui::run_captured(&args)?;
        if !ok {
            bail!("{}", stderr.trim());
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        let output = Command::new("umount")
            .arg(target)
            .output()
            .context("failed to spawn umount")?;
        if output.status.success() {
            return Ok(());
        }

        tracing::warn!(
            "umount {} failed ({}), retrying lazily",
            target.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        let status = Command::new("umount")
            .arg("-l")
            .arg(target)
            .status()
            .context("failed to spawn umount -l")?;
        if !status.success() {
            bail!("umount -l {} exited non-zero", target.display());
        }
        Ok(())
    }
}

// ─── Guard ────────────────────────────────────────────────────────────────────

/// A mounted share.  Unmounted and its directory removed on drop.
pub struct MountGuard<'a> {
    mounter: &'a dyn Mounter,
    path: PathBuf,
    registry: CleanupRegistry,
}

impl<'a> MountGuard<'a> {
    /// Create a private directory under `work_dir` and mount `share` on it.
    pub fn acquire(
        mounter: &'a dyn Mounter,
        share: &ShareConfig,
        work_dir: &Path,
        registry: &CleanupRegistry,
    ) -> Result<Self> {
        let path = tempfile::Builder::new()
            .prefix("nuckie-backup.")
            .tempdir_in(work_dir)
            .with_context(|| format!("creating temporary mount point in {}", work_dir.display()))?
            // Removal is ours: a recursive delete of a mounted share is never acceptable.
            .keep();

        registry.track_mount(&path);

        if let Err(e) = mounter.mount(share, &path) {
            registry.untrack_mount(&path);
            match std::fs::remove_dir(&path) {
                Err(rm) if rm.kind() != std::io::ErrorKind::NotFound => {
                    tracing::warn!("could not remove {}: {rm}", path.display());
                },
                _ => {},
            }
            return Err(RunError::Mount {
                share: share.source.clone(),
                target: path,
                reason: format!("{e:#}"),
            }
            .into());
        }

        tracing::info!("mounted {} at {}", share.source, path.display());
        Ok(Self {
            mounter,
            path,
            registry: registry.clone(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create (if absent) the manifest directory for `date` under the mount.
    pub fn create_manifest_dir(&self, date: NaiveDate) -> Result<PathBuf> {
        let dir = self.path.join(manifest::dir_name(date));
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating backup directory {}", dir.display()))?;
        Ok(dir)
    }
}

impl Drop for MountGuard<'_> {
    fn drop(&mut self) {
        if release_mount_point(&self.path, |p| self.mounter.unmount(p)) {
            tracing::debug!("released {}", self.path.display());
            self.registry.untrack_mount(&self.path);
        }
        // Otherwise it stays tracked so a later signal still retries.
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
