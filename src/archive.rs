//! Filesystem archives.
//!
//! An [`ArchiveSpec`] names one tarball, the trees that go into it (relative
//! to `/`) and an ordered list of tar exclusion globs.  The backup flow asks
//! [`plan`] which archives a run produces and turns each spec into a `tar`
//! command line with [`crate::runner::tar_create_args`].

use std::path::Path;

use crate::{
    cli::Options,
    config::ArchiveConfig,
    manifest::{HOME_ARCHIVE, ROOT_ARCHIVE},
};

pub const ROOT_LABEL: &str = "Root archive";
pub const HOME_LABEL: &str = "Home archive";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSpec {
    /// Stage label shown to the operator.
    pub label: &'static str,
    /// File name inside the manifest directory.
    pub file_name: &'static str,
    pub sources: Vec<String>,
    pub excludes: Vec<String>,
}

impl ArchiveSpec {
    pub fn root(cfg: &ArchiveConfig) -> Self {
        Self {
            label: ROOT_LABEL,
            file_name: ROOT_ARCHIVE,
            sources: cfg.root_sources.clone(),
            excludes: cfg
                .excludes
                .iter()
                .chain(&cfg.root_excludes)
                .cloned()
                .collect(),
        }
    }

    pub fn home(cfg: &ArchiveConfig) -> Self {
        Self {
            label: HOME_LABEL,
            file_name: HOME_ARCHIVE,
            sources: cfg.home_sources.clone(),
            excludes: cfg
                .excludes
                .iter()
                .chain(&cfg.home_excludes)
                .cloned()
                .collect(),
        }
    }

    /// Append an exclusion for an absolute path (tar member names carry no
    /// leading `/`).
    pub fn exclude_path(mut self, path: &Path) -> Self {
        let glob = path.to_string_lossy().trim_start_matches('/').to_string();
        if !glob.is_empty() && !self.excludes.contains(&glob) {
            self.excludes.push(glob);
        }
        self
    }
}

/// Archives a backup run with `opts` produces.  `mount_point` is excluded
/// from every one of them.
pub fn plan(opts: &Options, cfg: &ArchiveConfig, mount_point: &Path) -> Vec<ArchiveSpec> {
    let mut specs = Vec::new();
    if !opts.skip_root {
        specs.push(ArchiveSpec::root(cfg).exclude_path(mount_point));
    }
    if !opts.skip_home {
        specs.push(ArchiveSpec::home(cfg).exclude_path(mount_point));
    }
    specs
}

// ─── Tests ────────────────────────────────────────────────────────────────────
