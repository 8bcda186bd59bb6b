//! Argument vectors for every external tool the flows run.
//!
//! | Tool                              | Used by                         |
//! |-----------------------------------|---------------------------------|
//! | `mount`                           | [`crate::mount::SystemMounter`] |
//! | `tar`                             | both archives, both directions  |
//! | `apt-clone`, `apt-mark`           | package state                   |
//! | `curl`, `7z`, `chmod`             | fetching and unpacking the ISO  |
//! | `mksquashfs`, `md5sum`, `mkisofs` | remastering the ISO             |
//!
//! Nothing here spawns a process; [`crate::ui::run_stage`] does.  Paths are
//! passed through lossily since every tool takes them as plain arguments.

use std::path::Path;

use crate::{
    archive::ArchiveSpec,
    config::{IsoConfig, ShareConfig},
};

fn p(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ─── mount ────────────────────────────────────────────────────────────────────

/// `mount -t <fstype> [-o <options>] <source> <target>`
pub fn mount_args(share: &ShareConfig, target: &Path) -> Vec<String> {
    let mut cmd: Vec<String> = vec!["mount".into(), "-t".into(), share.fstype.clone()];
    if let Some(opts) = share.options.as_deref().filter(|o| !o.is_empty()) {
        cmd.extend(["-o".into(), opts.into()]);
    }
    cmd.extend([share.source.clone(), p(target)]);
    cmd
}

// ─── tar ──────────────────────────────────────────────────────────────────────

/// Create `dest` from `spec`, relative to `/`.
///
/// Exclusions precede the sources, in the order `spec.excludes` lists them.
pub fn tar_create_args(spec: &ArchiveSpec, dest: &Path) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "tar".into(),
        "--create".into(),
        "--gzip".into(),
        "--preserve-permissions".into(),
        "--one-file-system".into(),
        "--file".into(),
        p(dest),
        "--directory".into(),
        "/".into(),
    ];
    for glob in &spec.excludes {
        cmd.push(format!("--exclude={glob}"));
    }
    cmd.push("--".into());
    cmd.extend(spec.sources.iter().cloned());
    cmd
}

/// Extract `archive` over `root`, keeping modes and numeric ownership.
pub fn tar_extract_args(archive: &Path, root: &Path) -> Vec<String> {
    vec![
        "tar".into(),
        "--extract".into(),
        "--gzip".into(),
        "--preserve-permissions".into(),
        "--numeric-owner".into(),
        "--file".into(),
        p(archive),
        "--directory".into(),
        p(root),
    ]
}

// ─── packages ─────────────────────────────────────────────────────────────────

/// `apt-clone clone <stem>`; apt-clone writes `<stem>.apt-clone.tar.gz`.
pub fn apt_clone_args(stem: &Path) -> Vec<String> {
    vec!["apt-clone".into(), "clone".into(), p(stem)]
}

pub fn apt_clone_restore_args(archive: &Path) -> Vec<String> {
    vec!["apt-clone".into(), "restore".into(), p(archive)]
}

/// `apt-mark show<state>` for `auto`, `manual` or `hold`.
pub fn apt_mark_args(state: &str) -> Vec<String> {
    vec!["apt-mark".into(), format!("show{state}")]
}

// ─── installer image ──────────────────────────────────────────────────────────

pub fn download_args(url: &str, dest: &Path) -> Vec<String> {
    vec![
        "curl".into(),
        "--fail".into(),
        "--location".into(),
        "--silent".into(),
        "--show-error".into(),
        "--output".into(),
        p(dest),
        url.into(),
    ]
}

/// `7z x -y -o<dir> <iso>`
pub fn extract_iso_args(iso: &Path, dir: &Path) -> Vec<String> {
    vec![
        "7z".into(),
        "x".into(),
        "-y".into(),
        format!("-o{}", dir.display()),
        p(iso),
    ]
}

/// Files extracted from an ISO are read-only.
pub fn make_writable_args(dir: &Path) -> Vec<String> {
    vec!["chmod".into(), "-R".into(), "u+w".into(), p(dir)]
}

/// Append the contents of `src` to the existing squashfs `image`.
pub fn squashfs_append_args(src: &Path, image: &Path) -> Vec<String> {
    vec![
        "mksquashfs".into(),
        p(src),
        p(image),
        "-no-progress".into(),
    ]
}

pub fn md5sum_args(file: &Path) -> Vec<String> {
    vec!["md5sum".into(), p(file)]
}

/// Repack `tree` as a bootable image at `out`.
pub fn mkisofs_args(cfg: &IsoConfig, tree: &Path, out: &Path) -> Vec<String> {
    vec![
        "mkisofs".into(),
        "-r".into(),
        "-V".into(),
        cfg.volume_label.clone(),
        "-cache-inodes".into(),
        "-J".into(),
        "-l".into(),
        "-b".into(),
        cfg.boot_image.clone(),
        "-c".into(),
        cfg.boot_catalog.clone(),
        "-no-emul-boot".into(),
        "-boot-load-size".into(),
        "4".into(),
        "-boot-info-table".into(),
        "-o".into(),
        p(out),
        p(tree),
    ]
}

// ─── Tests ────────────────────────────────────────────────────────────────────
