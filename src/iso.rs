//! Autoinstall image construction.
//!
//! Turns a stock live-server installer into one that installs unattended
//! and carries this tool:
//!
//! 1. download the installer (`curl`)
//! 2. extract it into a scratch tree (`7z`) and make the tree writable
//! 3. add the autoinstall kernel parameters to every boot entry and seed
//!    `nocloud/user-data` + `nocloud/meta-data`
//! 4. append the tool to the root filesystem squashfs (`mksquashfs`)
//! 5. refresh `md5sum.txt` for everything touched (`md5sum`)
//! 6. repack the tree as a bootable image in the backup directory (`mkisofs`)
//!
//! Each step is a stage of its own; the first failure ends the image build.
//! The scratch tree is removed afterwards, or by the signal handler.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::{
    cleanup::CleanupRegistry,
    config::IsoConfig,
    manifest::TOOL_COPY,
    runner,
    ui::{StageOutcome, record, run_captured, run_stage, run_task},
};

pub const NOCLOUD_DIR: &str = "nocloud";
pub const MD5_MANIFEST: &str = "md5sum.txt";
/// Where the tool lands inside the installer's root filesystem.
pub const EMBED_DIR: &str = "nuckie";

// ─── Boot config edits ────────────────────────────────────────────────────────

/// GRUB treats `;` as a command separator.
pub fn escape_for_grub(params: &str) -> String {
    params.replace(';', "\\;")
}

/// Parameters as they must appear in the boot config at `rel_path`.
pub fn params_for(rel_path: &str, params: &str) -> String {
    if rel_path.ends_with("grub.cfg") {
        escape_for_grub(params)
    } else {
        params.to_string()
    }
}

/// Insert `params` before the `---` separator of every kernel command line
/// that does not carry them yet.  Returns the new text and the number of
/// lines changed.
pub fn inject_kernel_params(text: &str, params: &str) -> (String, usize) {
    let mut changed = 0;
    let mut out = String::with_capacity(text.len() + params.len() * 4);
    for line in text.split_inclusive('\n') {
        if line.contains("---") && !line.contains(params) {
            out.push_str(&line.replacen("---", &format!("{params} ---"), 1));
            changed += 1;
        } else {
            out.push_str(line);
        }
    }
    (out, changed)
}

// ─── md5sum.txt ───────────────────────────────────────────────────────────────

/// The hash from one line of `md5sum` output.
pub fn parse_md5sum(output: &str) -> Option<String> {
    let hash = output.split_whitespace().next()?;
    (hash.len() == 32 && hash.bytes().all(|b| b.is_ascii_hexdigit())).then(|| hash.to_string())
}

/// Replace (or append) the entries for `updates` (relative path, hash) in an
/// installer `md5sum.txt`, whose lines read `<hash>  ./<path>`.
pub fn update_md5_manifest(text: &str, updates: &[(String, String)]) -> String {
    let mut pending: Vec<&(String, String)> = updates.iter().collect();
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let path = line.split_once("  ").map(|(_, p)| p.trim_start_matches("./"));
        match path.and_then(|p| pending.iter().position(|(rel, _)| rel == p)) {
            Some(i) => {
                let (rel, hash) = pending.remove(i);
                out.push_str(&format!("{hash}  ./{rel}\n"));
            },
            None => {
                out.push_str(line);
                out.push('\n');
            },
        }
    }
    for (rel, hash) in pending {
        out.push_str(&format!("{hash}  ./{rel}\n"));
    }
    out
}

// ─── Steps ────────────────────────────────────────────────────────────────────

/// Everything one image build needs.
pub struct ImageJob<'a> {
    pub cfg: &'a IsoConfig,
    pub user_data: &'a Path,
    /// Executable appended to the squashfs.
    pub tool: &'a Path,
    pub work_dir: &'a Path,
    /// Final image path (inside the backup directory).
    pub output: PathBuf,
}

/// Patch boot configs, drop 7z's `[BOOT]` directory, write the nocloud seed.
/// Returns the relative paths of files that changed.
fn seed_autoinstall(job: &ImageJob<'_>, tree: &Path) -> Result<Vec<String>> {
    let mut touched = Vec::new();

    for rel in &job.cfg.boot_configs {
        let path = tree.join(rel);
        if !path.is_file() {
            tracing::debug!("boot config {rel} not present, skipping");
            continue;
        }
        let text =
            std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let (patched, n) = inject_kernel_params(&text, &params_for(rel, &job.cfg.kernel_params));
        if n > 0 {
            std::fs::write(&path, patched).with_context(|| format!("writing {}", path.display()))?;
            touched.push(rel.clone());
        }
        tracing::debug!("{rel}: {n} boot entries patched");
    }
    if touched.is_empty() {
        bail!("no boot entry found to patch in {}", job.cfg.boot_configs.join(", "));
    }

    let boot = tree.join("[BOOT]");
    if boot.exists() {
        std::fs::remove_dir_all(&boot).with_context(|| format!("removing {}", boot.display()))?;
    }

    let nocloud = tree.join(NOCLOUD_DIR);
    std::fs::create_dir_all(&nocloud)
        .with_context(|| format!("creating {}", nocloud.display()))?;
    std::fs::copy(job.user_data, nocloud.join("user-data"))
        .with_context(|| format!("copying {}", job.user_data.display()))?;
    std::fs::write(nocloud.join("meta-data"), "")
        .with_context(|| format!("writing {}/meta-data", nocloud.display()))?;
    touched.push(format!("{NOCLOUD_DIR}/user-data"));
    touched.push(format!("{NOCLOUD_DIR}/meta-data"));

    Ok(touched)
}

/// Stage a directory holding only `nuckie/nuckie-backup`.
fn stage_tool(job: &ImageJob<'_>, scratch: &Path) -> Result<PathBuf> {
    let embed = scratch.join("embed");
    let dir = embed.join(EMBED_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    std::fs::copy(job.tool, dir.join(TOOL_COPY))
        .with_context(|| format!("copying {}", job.tool.display()))?;
    Ok(embed)
}

fn refresh_checksums(tree: &Path, touched: &[String]) -> Result<String> {
    let mut updates = Vec::with_capacity(touched.len());
    for rel in touched {
        let (ok, stdout, stderr) = run_captured(&runner::md5sum_args(&tree.join(rel)))?;
        if !ok {
            bail!("md5sum {rel}: {}", stderr.trim());
        }
        let hash = parse_md5sum(&stdout).with_context(|| format!("unexpected md5sum output for {rel}"))?;
        updates.push((rel.clone(), hash));
    }

    let manifest = tree.join(MD5_MANIFEST);
    let text = if manifest.is_file() {
        std::fs::read_to_string(&manifest)
            .with_context(|| format!("reading {}", manifest.display()))?
    } else {
        String::new()
    };
    std::fs::write(&manifest, update_md5_manifest(&text, &updates))
        .with_context(|| format!("writing {}", manifest.display()))?;

    Ok(format!("{} checksums refreshed", updates.len()))
}

/// Build the image described by `job`, appending one outcome per step.
pub fn build(job: &ImageJob<'_>, registry: &CleanupRegistry, outcomes: &mut Vec<StageOutcome>) {
    let scratch = match tempfile::Builder::new()
        .prefix("nuckie-iso.")
        .tempdir_in(job.work_dir)
    {
        Ok(dir) => dir,
        Err(e) => {
            record(
                outcomes,
                StageOutcome::from_result(
                    "Image: scratch",
                    Err(anyhow::Error::new(e).context(format!(
                        "creating scratch directory in {}",
                        job.work_dir.display()
                    ))),
                ),
            );
            return;
        },
    };
    registry.track_scratch(scratch.path());

    build_in(job, scratch.path(), outcomes);

    registry.untrack_scratch(scratch.path());
    let path = scratch.path().to_path_buf();
    if let Err(e) = scratch.close() {
        tracing::warn!("could not remove {}: {e}", path.display());
    }
}

fn build_in(job: &ImageJob<'_>, scratch: &Path, outcomes: &mut Vec<StageOutcome>) {
    let installer = scratch.join("installer.iso");
    let tree = scratch.join("tree");

    if record(
        outcomes,
        run_stage("Image: download", &runner::download_args(&job.cfg.url, &installer)),
    ) {
        return;
    }
    if record(
        outcomes,
        run_stage("Image: extract", &runner::extract_iso_args(&installer, &tree)),
    ) {
        return;
    }
    if let Err(e) = std::fs::remove_file(&installer) {
        tracing::debug!("could not remove {}: {e}", installer.display());
    }
    if record(
        outcomes,
        run_stage("Image: permissions", &runner::make_writable_args(&tree)),
    ) {
        return;
    }

    let mut touched = Vec::new();
    let seeded = run_task("Image: autoinstall seed", || {
        touched = seed_autoinstall(job, &tree)?;
        Ok(touched.join(", "))
    });
    if record(outcomes, seeded) {
        return;
    }

    let embed = match stage_tool(job, scratch) {
        Ok(dir) => dir,
        Err(e) => {
            record(outcomes, StageOutcome::from_result("Image: embed tool", Err(e)));
            return;
        },
    };
    let squashfs = tree.join(&job.cfg.squashfs);
    if record(
        outcomes,
        run_stage(
            "Image: embed tool",
            &runner::squashfs_append_args(&embed, &squashfs),
        ),
    ) {
        return;
    }
    touched.push(job.cfg.squashfs.clone());

    if record(
        outcomes,
        run_task("Image: checksums", || refresh_checksums(&tree, &touched)),
    ) {
        return;
    }

    record(
        outcomes,
        run_stage(
            "Image: repack",
            &runner::mkisofs_args(job.cfg, &tree, &job.output),
        ),
    );
}

// ─── Tests ────────────────────────────────────────────────────────────────────
