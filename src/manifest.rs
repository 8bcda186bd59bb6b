//! Backup directory layout.
//!
//! Each backup run writes one directory named after the run date
//! (`DD-MM-YYYY`) at the root of the share:
//!
//! ```text
//! 07-03-2024/
//! ├── distribution.desc
//! ├── passwd.backup
//! ├── group.backup
//! ├── shadow.backup
//! ├── packages.apt-clone.tar.gz
//! ├── packages.auto / packages.manual / packages.hold
//! ├── backuproot.tar.gz            (unless -r / -t)
//! ├── backuphome.tar.gz            (unless -m / -t)
//! ├── nuckie-backup
//! └── ubuntu-autoinstall-07-03-2024.iso   (unless -i)
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::error::RunError;

pub const DATE_FORMAT: &str = "%d-%m-%Y";

pub const DISTRIBUTION: &str = "distribution.desc";
pub const PASSWD: &str = "passwd.backup";
pub const GROUP: &str = "group.backup";
pub const SHADOW: &str = "shadow.backup";

/// Stem handed to `apt-clone clone`; it appends [`APT_CLONE_SUFFIX`].
pub const PACKAGES: &str = "packages";
pub const APT_CLONE_SUFFIX: &str = ".apt-clone.tar.gz";

pub const ROOT_ARCHIVE: &str = "backuproot.tar.gz";
pub const HOME_ARCHIVE: &str = "backuphome.tar.gz";
pub const TOOL_COPY: &str = "nuckie-backup";

pub fn dir_name(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_dir_name(name: &str) -> Option<NaiveDate> {
    // chrono accepts unpadded fields; insist on the exact shape we write.
    if name.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(name, DATE_FORMAT).ok()
}

pub fn package_archive() -> String {
    format!("{PACKAGES}{APT_CLONE_SUFFIX}")
}

/// `packages.auto`, `packages.manual`, `packages.hold`.
pub fn package_state_file(state: &str) -> String {
    format!("{PACKAGES}.{state}")
}

pub fn iso_name(date: NaiveDate) -> String {
    format!("ubuntu-autoinstall-{}.iso", dir_name(date))
}

// ─── Listing ──────────────────────────────────────────────────────────────────

/// One backup directory found on the share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDir {
    pub date: NaiveDate,
    pub path: PathBuf,
}

impl ManifestDir {
    pub fn name(&self) -> String {
        dir_name(self.date)
    }
}

/// Every backup directory under `root`, oldest first.
///
/// Entries whose name is not a `DD-MM-YYYY` date are ignored.
pub fn list(root: &Path) -> Result<Vec<ManifestDir>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(root).with_context(|| format!("listing {}", root.display()))? {
        let entry = entry.with_context(|| format!("listing {}", root.display()))?;
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let Some(date) = entry.file_name().to_str().and_then(parse_dir_name) else {
            continue;
        };
        found.push(ManifestDir {
            date,
            path: entry.path(),
        });
    }
    found.sort_by_key(|m| m.date);
    Ok(found)
}

// ─── Artifact contract ────────────────────────────────────────────────────────

/// Artifacts a restore needs, given which archives it will extract.
pub fn required_artifacts(skip_root: bool, skip_home: bool) -> Vec<String> {
    let mut names: Vec<String> = [DISTRIBUTION, PASSWD, GROUP, SHADOW]
        .map(String::from)
        .to_vec();
    names.push(package_archive());
    if !skip_root {
        names.push(ROOT_ARCHIVE.into());
    }
    if !skip_home {
        names.push(HOME_ARCHIVE.into());
    }
    names
}

/// Fail unless every name in `required` is a file inside `dir`.
pub fn verify(dir: &Path, required: &[String]) -> Result<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !dir.join(name).is_file())
        .cloned()
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RunError::MissingArtifacts {
            dir: dir.to_path_buf(),
            missing,
        }
        .into())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dir_name_is_day_month_year() {
        assert_eq!(dir_name(date(2024, 3, 7)), "07-03-2024");
    }

    #[test]
    fn parse_rejects_other_shapes() {
        assert_eq!(parse_dir_name("07-03-2024"), Some(date(2024, 3, 7)));
        assert_eq!(parse_dir_name("7-3-2024"), None);
        assert_eq!(parse_dir_name("2024-03-07"), None);
        assert_eq!(parse_dir_name("31-02-2024"), None);
        assert_eq!(parse_dir_name("lost+found"), None);
    }

    #[test]
    fn artifact_names() {
        assert_eq!(package_archive(), "packages.apt-clone.tar.gz");
        assert_eq!(package_state_file("hold"), "packages.hold");
        assert_eq!(iso_name(date(2023, 12, 1)), "ubuntu-autoinstall-01-12-2023.iso");
    }

    #[test]
    fn list_orders_by_date_not_by_name() {
        let root = tempfile::tempdir().unwrap();
        // Lexicographically "31-01-2023" sorts after "01-06-2024".
        for name in ["01-06-2024", "31-01-2023", "15-02-2024", "not-a-backup"] {
            fs::create_dir(root.path().join(name)).unwrap();
        }
        fs::write(root.path().join("02-02-2022"), "a file, not a dir").unwrap();

        let names: Vec<String> = list(root.path()).unwrap().iter().map(ManifestDir::name).collect();
        assert_eq!(names, ["31-01-2023", "15-02-2024", "01-06-2024"]);
    }

    #[test]
    fn list_of_empty_share_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(list(root.path()).unwrap().is_empty());
    }

    #[test]
    fn required_artifacts_follow_skip_flags() {
        let all = required_artifacts(false, false);
        assert!(all.contains(&ROOT_ARCHIVE.to_string()));
        assert!(all.contains(&HOME_ARCHIVE.to_string()));

        let none = required_artifacts(true, true);
        assert!(!none.contains(&ROOT_ARCHIVE.to_string()));
        assert!(!none.contains(&HOME_ARCHIVE.to_string()));
        assert!(none.contains(&SHADOW.to_string()));
        assert!(none.contains(&package_archive()));
    }

    #[test]
    fn verify_lists_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [DISTRIBUTION, PASSWD, GROUP] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let err = verify(dir.path(), &required_artifacts(false, true)).unwrap_err();
        match err.downcast_ref::<RunError>() {
            Some(RunError::MissingArtifacts { missing, .. }) => {
                assert_eq!(missing, &[SHADOW, "packages.apt-clone.tar.gz", ROOT_ARCHIVE]);
            },
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn verify_passes_on_complete_backup() {
        let dir = tempfile::tempdir().unwrap();
        let required = required_artifacts(false, false);
        for name in &required {
            fs::write(dir.path().join(name), "").unwrap();
        }
        assert!(verify(dir.path(), &required).is_ok());
    }
}
