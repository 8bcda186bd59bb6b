//! Site configuration and loading logic.
//!
//! Every field has a compiled-in default, so the tool runs with no config
//! file at all: the share address, archive rules and installer image settings
//! below *are* the Nuckie setup.  An operator may override any of them with a
//! TOML file passed via `--config` (or dropped at [`DEFAULT_CONFIG_PATH`]).
//!
//! # File format
//!
//! ```toml
//! [share]
//! source  = "nas.lan:/mnt/vol1/backups"
//! fstype  = "nfs"
//! options = "vers=4"        # optional, passed to `mount -o`
//!
//! [paths]
//! work_dir     = "/tmp"     # parent of the temporary mount point and ISO scratch
//! etc_dir      = "/etc"
//! restore_root = "/"
//!
//! [accounts]
//! min_id = 500
//!
//! [archive]
//! root_sources  = ["etc", "opt", "root", "srv", "usr/local", "var"]
//! home_sources  = ["home"]
//! excludes      = ["*.sock", "*.pid", "*/.cache"]
//! root_excludes = ["var/cache", "var/log"]
//! home_excludes = ["home/*/.cache"]
//!
//! [iso]
//! url = "https://releases.ubuntu.com/20.04/ubuntu-20.04.6-live-server-amd64.iso"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Loaded when `--config` is not given.  Absence is normal.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nuckie-backup/config.toml";

// ─── Top-level ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub share: ShareConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub archive: ArchiveConfig,

    #[serde(default)]
    pub iso: IsoConfig,
}

// ─── [share] ──────────────────────────────────────────────────────────────────

/// The remote share every run mounts.
#[derive(Debug, Deserialize, Serialize)]
pub struct ShareConfig {
    /// `server:/export/path`.
    pub source: String,

    /// Filesystem type handed to `mount -t`.
    #[serde(default = "default_fstype")]
    pub fstype: String,

    /// Extra `mount -o` options.
    #[serde(default)]
    pub options: Option<String>,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            source: String::from("nas.lan:/mnt/vol1/backups"),
            fstype: default_fstype(),
            options: None,
        }
    }
}

// ─── [paths] ──────────────────────────────────────────────────────────────────

/// Local filesystem locations.  Tests point these at temp directories.
#[derive(Debug, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Parent directory for the private mount point and the ISO scratch area.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Where `passwd`, `group`, `shadow` and `os-release` live.
    #[serde(default = "default_etc_dir")]
    pub etc_dir: PathBuf,

    /// Archives are extracted relative to this directory.
    #[serde(default = "default_restore_root")]
    pub restore_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            etc_dir: default_etc_dir(),
            restore_root: default_restore_root(),
        }
    }
}

// ─── [accounts] ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
pub struct AccountsConfig {
    /// Lowest uid/gid treated as a regular (non-system) account.
    #[serde(default = "default_min_id")]
    pub min_id: u32,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            min_id: default_min_id(),
        }
    }
}

// ─── [archive] ────────────────────────────────────────────────────────────────

/// What goes into `backuproot.tar.gz` / `backuphome.tar.gz`.
///
/// Sources are relative to `/` so the archives extract back in place.
/// Exclusions are tar globs, evaluated in order.
#[derive(Debug, Deserialize, Serialize)]
pub struct ArchiveConfig {
    #[serde(default = "default_root_sources")]
    pub root_sources: Vec<String>,

    #[serde(default = "default_home_sources")]
    pub home_sources: Vec<String>,

    /// Applied to both archives.
    #[serde(default = "default_excludes")]
    pub excludes: Vec<String>,

    #[serde(default = "default_root_excludes")]
    pub root_excludes: Vec<String>,

    #[serde(default = "default_home_excludes")]
    pub home_excludes: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_sources: default_root_sources(),
            home_sources: default_home_sources(),
            excludes: default_excludes(),
            root_excludes: default_root_excludes(),
            home_excludes: default_home_excludes(),
        }
    }
}

// ─── [iso] ────────────────────────────────────────────────────────────────────

/// Installer image remastering settings.
#[derive(Debug, Deserialize, Serialize)]
pub struct IsoConfig {
    /// Live-server installer image to download.
    #[serde(default = "default_iso_url")]
    pub url: String,

    /// Kernel parameters inserted before `---` on every boot entry.
    #[serde(default = "default_kernel_params")]
    pub kernel_params: String,

    /// Boot configs (relative to the image root) that receive the parameters.
    #[serde(default = "default_boot_configs")]
    pub boot_configs: Vec<String>,

    /// Root filesystem image the tool is appended to.
    #[serde(default = "default_squashfs")]
    pub squashfs: String,

    /// El Torito boot image and catalog, relative to the image root.
    #[serde(default = "default_boot_image")]
    pub boot_image: String,

    #[serde(default = "default_boot_catalog")]
    pub boot_catalog: String,

    #[serde(default = "default_volume_label")]
    pub volume_label: String,
}

impl Default for IsoConfig {
    fn default() -> Self {
        Self {
            url: default_iso_url(),
            kernel_params: default_kernel_params(),
            boot_configs: default_boot_configs(),
            squashfs: default_squashfs(),
            boot_image: default_boot_image(),
            boot_catalog: default_boot_catalog(),
            volume_label: default_volume_label(),
        }
    }
}

// ─── Defaults ─────────────────────────────────────────────────────────────────

// Referenced by `#[serde(default = "…")]` and by the `Default` impls.

pub fn default_fstype() -> String {
    "nfs".into()
}

pub fn default_work_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

pub fn default_etc_dir() -> PathBuf {
    PathBuf::from("/etc")
}

pub fn default_restore_root() -> PathBuf {
    PathBuf::from("/")
}

pub fn default_min_id() -> u32 {
    500
}

pub fn default_root_sources() -> Vec<String> {
    ["etc", "opt", "root", "srv", "usr/local", "var"]
        .map(String::from)
        .to_vec()
}

pub fn default_home_sources() -> Vec<String> {
    vec!["home".into()]
}

pub fn default_excludes() -> Vec<String> {
    ["*.sock", "*.pid", "*/.cache"].map(String::from).to_vec()
}

pub fn default_root_excludes() -> Vec<String> {
    [
        "var/cache",
        "var/log",
        "var/cache/apt/archives",
        "var/tmp",
        "var/run",
        "var/lib/docker",
        "usr/src/linux-headers-*",
    ]
    .map(String::from)
    .to_vec()
}

pub fn default_home_excludes() -> Vec<String> {
    ["home/*/.cache", "home/*/.local/share/Trash"]
        .map(String::from)
        .to_vec()
}

pub fn default_iso_url() -> String {
    "https://releases.ubuntu.com/20.04/ubuntu-20.04.6-live-server-amd64.iso".into()
}

pub fn default_kernel_params() -> String {
    "autoinstall ds=nocloud;s=/cdrom/nocloud/".into()
}

pub fn default_boot_configs() -> Vec<String> {
    vec!["boot/grub/grub.cfg".into(), "isolinux/txt.cfg".into()]
}

pub fn default_squashfs() -> String {
    "casper/filesystem.squashfs".into()
}

pub fn default_boot_image() -> String {
    "isolinux/isolinux.bin".into()
}

pub fn default_boot_catalog() -> String {
    "isolinux/boot.cat".into()
}

pub fn default_volume_label() -> String {
    "Ubuntu-Autoinstall".into()
}

// ─── Loader ───────────────────────────────────────────────────────────────────

/// Load the configuration.
///
/// With `explicit = Some(path)` the file must exist.  With `None` the
/// [`DEFAULT_CONFIG_PATH`] is tried and the compiled-in defaults are used when
/// it is absent.
///
/// Returns an error if a file exists but cannot be read or is not valid TOML.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => p,
        None => {
            let p = Path::new(DEFAULT_CONFIG_PATH);
            if !p.exists() {
                tracing::debug!("no config at {DEFAULT_CONFIG_PATH}, using built-in defaults");
                return Ok(Config::default());
            }
            p
        },
    };

    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    let cfg = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    tracing::debug!("loaded config from {}", path.display());
    Ok(cfg)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_share_is_the_nuckie_nas() {
        let cfg = Config::default();
        assert_eq!(cfg.share.source, "nas.lan:/mnt/vol1/backups");
        assert_eq!(cfg.share.fstype, "nfs");
        assert!(cfg.share.options.is_none());
    }

    #[test]
    fn default_threshold_is_500() {
        assert_eq!(AccountsConfig::default().min_id, 500);
    }

    #[test]
    fn default_root_excludes_cover_caches_and_headers() {
        let ex = default_root_excludes();
        assert!(ex.contains(&"var/cache/apt/archives".to_string()));
        assert!(ex.contains(&"var/log".to_string()));
        assert!(ex.iter().any(|g| g.contains("linux-headers")));
    }

    #[test]
    fn sources_are_relative() {
        let cfg = ArchiveConfig::default();
        for s in cfg.root_sources.iter().chain(&cfg.home_sources) {
            assert!(!s.starts_with('/'), "{s} should be relative to /");
        }
    }

    #[test]
    fn grub_and_isolinux_configs_are_patched_by_default() {
        let cfgs = default_boot_configs();
        assert!(cfgs.iter().any(|c| c.ends_with("grub.cfg")));
        assert!(cfgs.iter().any(|c| c.ends_with("txt.cfg")));
    }

    #[test]
    fn partial_toml_uses_defaults_for_missing_fields() {
        let toml_str = r#"
            [share]
            source = "backup.lan:/export/nuckie"
        "#;
        let cfg: Config = toml::from_str(toml_str).expect("parse failed");
        assert_eq!(cfg.share.source, "backup.lan:/export/nuckie");
        assert_eq!(cfg.share.fstype, "nfs");
        assert_eq!(cfg.paths.etc_dir, PathBuf::from("/etc"));
        assert_eq!(cfg.archive.home_sources, default_home_sources());
        assert_eq!(cfg.iso.squashfs, default_squashfs());
    }

    #[test]
    fn empty_toml_deserialises_to_defaults() {
        let cfg: Config = toml::from_str("").expect("empty toml should parse");
        assert_eq!(cfg.share.source, ShareConfig::default().source);
        assert_eq!(cfg.accounts.min_id, 500);
    }

    #[test]
    fn load_config_errors_when_explicit_file_missing() {
        let path = Path::new("/tmp/this-file-should-never-exist-nuckie.toml");
        assert!(!path.exists(), "test precondition: file must not exist");
        assert!(load_config(Some(path)).is_err());
    }

    #[test]
    fn load_config_parses_valid_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"
            [paths]
            work_dir = "/var/tmp"

            [accounts]
            min_id = 1000
            "#
        )
        .unwrap();

        let cfg = load_config(Some(f.path())).expect("should parse valid toml");
        assert_eq!(cfg.paths.work_dir, PathBuf::from("/var/tmp"));
        assert_eq!(cfg.accounts.min_id, 1000);
    }

    #[test]
    fn load_config_errors_on_invalid_toml() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "not valid toml ][[[").unwrap();
        assert!(load_config(Some(f.path())).is_err());
    }
}
