//! User, group and shadow records.
//!
//! Backup keeps only *regular* accounts: numeric id at or above the
//! configured threshold, and not `nobody`/`nogroup` (65534).  Shadow records
//! follow the passwd selection by user name.
//!
//! Restore appends the backed-up records to the live files, skipping any
//! whose name the live file already has, so a re-run never duplicates users.

use std::{
    collections::HashSet,
    fs::OpenOptions,
    io::Write,
    path::Path,
};

use anyhow::{Context, Result};

pub const NOBODY_ID: u32 = 65534;

pub fn is_regular_id(id: u32, min_id: u32) -> bool {
    id >= min_id && id != NOBODY_ID
}

/// Name (field 0) of a colon-separated record.
fn record_name(line: &str) -> Option<&str> {
    line.split(':').next().filter(|n| !n.is_empty())
}

/// Numeric id stored in field 2 of passwd and group records.
fn record_id(line: &str) -> Option<u32> {
    line.split(':').nth(2)?.trim().parse().ok()
}

/// Regular-account lines of a passwd or group file, in file order.
///
/// Comments, blank lines and records without a numeric id are dropped.
pub fn filter_by_id(text: &str, min_id: u32) -> Vec<&str> {
    text.lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter(|l| record_id(l).is_some_and(|id| is_regular_id(id, min_id)))
        .collect()
}

/// Shadow lines belonging to `users`.
pub fn filter_shadow<'a>(text: &'a str, users: &HashSet<&str>) -> Vec<&'a str> {
    text.lines()
        .filter(|l| record_name(l).is_some_and(|n| users.contains(n)))
        .collect()
}

fn join_lines(lines: &[&str]) -> String {
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn write(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

/// Like [`write`], but the file is `0600` before any byte lands in it, also
/// when an earlier run left it with a wider mode.
fn write_private(path: &Path, contents: &str) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("chmod 600 {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("writing {}", path.display()))
}

/// Counts of records written by [`extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted {
    pub users: usize,
    pub groups: usize,
    pub shadow: usize,
}

/// Write `passwd.backup`, `group.backup` and `shadow.backup` into `dest`.
pub fn extract(etc_dir: &Path, dest: &Path, min_id: u32) -> Result<Extracted> {
    use crate::manifest::{GROUP, PASSWD, SHADOW};

    let passwd = read(&etc_dir.join("passwd"))?;
    let group = read(&etc_dir.join("group"))?;
    let shadow = read(&etc_dir.join("shadow"))?;

    let users = filter_by_id(&passwd, min_id);
    let groups = filter_by_id(&group, min_id);
    let names: HashSet<&str> = users.iter().filter_map(|l| record_name(l)).collect();
    let secrets = filter_shadow(&shadow, &names);

    write(&dest.join(PASSWD), &join_lines(&users))?;
    write(&dest.join(GROUP), &join_lines(&groups))?;
    // Password hashes.
    write_private(&dest.join(SHADOW), &join_lines(&secrets))?;

    Ok(Extracted {
        users: users.len(),
        groups: groups.len(),
        shadow: secrets.len(),
    })
}

/// Backed-up records whose name does not appear in `live`.
pub fn missing_records<'a>(live: &str, backup: &'a str) -> Vec<&'a str> {
    let present: HashSet<&str> = live.lines().filter_map(record_name).collect();
    backup
        .lines()
        .filter(|l| record_name(l).is_some_and(|n| !present.contains(n)))
        .collect()
}

/// Append the records of `backup` missing from `live`.  Returns how many
/// were appended.
pub fn merge_into(live: &Path, backup: &Path) -> Result<usize> {
    let live_text = read(live)?;
    let backup_text = read(backup)?;
    let new = missing_records(&live_text, &backup_text);
    if new.is_empty() {
        return Ok(0);
    }

    let mut file = OpenOptions::new()
        .append(true)
        .open(live)
        .with_context(|| format!("opening {} for append", live.display()))?;

    let mut chunk = String::new();
    if !live_text.is_empty() && !live_text.ends_with('\n') {
        chunk.push('\n');
    }
    chunk.push_str(&join_lines(&new));
    file.write_all(chunk.as_bytes())
        .with_context(|| format!("appending to {}", live.display()))?;

    Ok(new.len())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
syslog:x:104:110::/home/syslog:/usr/sbin/nologin
edge:x:499:499::/home/edge:/bin/sh
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
alice:x:500:500:Alice:/home/alice:/bin/bash
bob:x:1000:1000:Bob:/home/bob:/bin/bash
broken:x:notanumber:1:::
";

    const GROUP: &str = "\
root:x:0:
adm:x:4:syslog,alice
nogroup:x:65534:
alice:x:500:
bob:x:1000:
";

    const SHADOW: &str = "\
root:!:19000:0:99999:7:::
nobody:*:19000:0:99999:7:::
alice:$6$salt$hash:19000:0:99999:7:::
bob:$6$salt$other:19000:0:99999:7:::
";

    #[test]
    fn threshold_is_inclusive_and_nobody_is_excluded() {
        assert!(!is_regular_id(499, 500));
        assert!(is_regular_id(500, 500));
        assert!(is_regular_id(65533, 500));
        assert!(!is_regular_id(65534, 500));
        assert!(is_regular_id(65535, 500));
    }

    #[test]
    fn every_threshold_selects_exactly_the_regular_ids() {
        for min_id in [0, 1, 104, 499, 500, 501, 1000, 65534, 65535] {
            let got: Vec<u32> = filter_by_id(PASSWD, min_id)
                .iter()
                .map(|l| record_id(l).unwrap())
                .collect();
            let want: Vec<u32> = [0, 1, 104, 499, 65534, 500, 1000]
                .into_iter()
                .filter(|&id| id >= min_id && id != 65534)
                .collect();
            assert_eq!(got, want, "min_id = {min_id}");
        }
    }

    #[test]
    fn passwd_filter_keeps_regular_users() {
        let names: Vec<_> = filter_by_id(PASSWD, 500)
            .iter()
            .filter_map(|l| record_name(l))
            .collect();
        assert_eq!(names, ["alice", "bob"]);
    }

    #[test]
    fn group_filter_uses_gid() {
        assert_eq!(filter_by_id(GROUP, 500), ["alice:x:500:", "bob:x:1000:"]);
    }

    #[test]
    fn comments_and_blank_lines_are_dropped() {
        let text = "# comment\n\nalice:x:500:500::/home/alice:/bin/bash\n";
        assert_eq!(filter_by_id(text, 500).len(), 1);
    }

    #[test]
    fn shadow_follows_passwd_selection() {
        let users: HashSet<&str> = ["alice", "bob"].into_iter().collect();
        let lines = filter_shadow(SHADOW, &users);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| !l.starts_with("nobody")));
    }

    #[test]
    fn extract_writes_three_files() {
        let etc = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(etc.path().join("passwd"), PASSWD).unwrap();
        fs::write(etc.path().join("group"), GROUP).unwrap();
        fs::write(etc.path().join("shadow"), SHADOW).unwrap();

        let counts = extract(etc.path(), dest.path(), 500).unwrap();
        assert_eq!(counts, Extracted {
            users: 2,
            groups: 2,
            shadow: 2
        });

        let passwd = fs::read_to_string(dest.path().join("passwd.backup")).unwrap();
        assert_eq!(
            passwd,
            "alice:x:500:500:Alice:/home/alice:/bin/bash\nbob:x:1000:1000:Bob:/home/bob:/bin/bash\n"
        );
        let shadow = fs::read_to_string(dest.path().join("shadow.backup")).unwrap();
        assert!(shadow.starts_with("alice:$6$"));
    }

    #[test]
    fn shadow_backup_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let etc = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(etc.path().join("passwd"), PASSWD).unwrap();
        fs::write(etc.path().join("group"), GROUP).unwrap();
        fs::write(etc.path().join("shadow"), SHADOW).unwrap();

        // Same-day re-run over a file that ended up world-readable.
        let stale = dest.path().join("shadow.backup");
        fs::write(&stale, "stale").unwrap();
        fs::set_permissions(&stale, fs::Permissions::from_mode(0o644)).unwrap();

        extract(etc.path(), dest.path(), 500).unwrap();
        let mode = fs::metadata(&stale).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(fs::read_to_string(&stale).unwrap().starts_with("alice:$6$"));

        let fresh = dest.path().join("fresh");
        write_private(&fresh, "x").unwrap();
        let mode = fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn extract_fails_without_shadow() {
        let etc = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        fs::write(etc.path().join("passwd"), PASSWD).unwrap();
        fs::write(etc.path().join("group"), GROUP).unwrap();
        assert!(extract(etc.path(), dest.path(), 500).is_err());
    }

    #[test]
    fn merge_appends_only_missing_records() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("passwd");
        let backup = dir.path().join("passwd.backup");
        fs::write(&live, "root:x:0:0:root:/root:/bin/bash\nalice:x:500:500::/home/alice:/bin/bash").unwrap();
        fs::write(
            &backup,
            "alice:x:500:500:Alice:/home/alice:/bin/bash\nbob:x:1000:1000:Bob:/home/bob:/bin/bash\n",
        )
        .unwrap();

        assert_eq!(merge_into(&live, &backup).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(&live).unwrap(),
            "root:x:0:0:root:/root:/bin/bash\nalice:x:500:500::/home/alice:/bin/bash\n\
             bob:x:1000:1000:Bob:/home/bob:/bin/bash\n"
        );

        // Idempotent.
        assert_eq!(merge_into(&live, &backup).unwrap(), 0);
    }

    #[test]
    fn merge_of_empty_backup_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let live = dir.path().join("group");
        let backup = dir.path().join("group.backup");
        fs::write(&live, "root:x:0:\n").unwrap();
        fs::write(&backup, "").unwrap();

        assert_eq!(merge_into(&live, &backup).unwrap(), 0);
        assert_eq!(fs::read_to_string(&live).unwrap(), "root:x:0:\n");
    }
}
