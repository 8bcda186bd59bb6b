//! Cleanup on interruption.
//!
//! Normal and error exits release the mount through [`crate::mount::MountGuard`]'s
//! `Drop`.  A signal, however, never unwinds the main thread, so everything
//! that must not outlive the process is also recorded here.  A dedicated
//! thread waits for SIGINT/SIGTERM/SIGHUP, stops the running tool (if any),
//! tears down whatever is still tracked, and exits with status 1.

use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};

#[derive(Debug, Default)]
struct Tracked {
    mounts: Vec<PathBuf>,
    scratch: Vec<PathBuf>,
}

/// Mount points and scratch directories that must be released on exit.
///
/// Cheap to clone; all clones share one list.
#[derive(Debug, Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<Tracked>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tracked> {
        // A panic while holding the lock leaves the lists intact.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Track a directory that is (or is about to be) a mount point.
    pub fn track_mount(&self, path: &Path) {
        self.lock().mounts.push(path.to_path_buf());
    }

    pub fn untrack_mount(&self, path: &Path) {
        self.lock().mounts.retain(|p| p != path);
    }

    /// Track a local scratch directory, removed recursively on interruption.
    pub fn track_scratch(&self, path: &Path) {
        self.lock().scratch.push(path.to_path_buf());
    }

    pub fn untrack_scratch(&self, path: &Path) {
        self.lock().scratch.retain(|p| p != path);
    }

    #[cfg(test)]
    pub fn mounts(&self) -> Vec<PathBuf> {
        self.lock().mounts.clone()
    }

    #[cfg(test)]
    pub fn scratch(&self) -> Vec<PathBuf> {
        self.lock().scratch.clone()
    }

    /// Release everything still tracked.
    ///
    /// Scratch directories go first since they may live under a mount.  Each
    /// mount point then gets an unmount attempt followed by a non-recursive
    /// removal.  The removal also covers a directory whose mount never
    /// completed, and fails harmlessly on one that is still mounted.
    pub fn release_all(&self, unmount: impl Fn(&Path) -> Result<()>) {
        let (mounts, scratch) = {
            let mut t = self.lock();
            (std::mem::take(&mut t.mounts), std::mem::take(&mut t.scratch))
        };

        for dir in scratch {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!("could not remove {}: {e}", dir.display());
            }
        }

        // Deepest first, in case of nested mounts.
        let mut mounts = mounts;
        mounts.sort_by_key(|m| std::cmp::Reverse(m.as_os_str().len()));
        for mount in mounts {
            release_mount_point(&mount, &unmount);
        }
    }
}

/// Unmount `dir`, then remove it with `remove_dir`.  Returns `true` once the
/// directory is gone.
///
/// A failed unmount is not final: if nothing was mounted the directory is
/// empty and goes away; if the share is still attached `remove_dir` refuses.
pub fn release_mount_point(dir: &Path, unmount: impl Fn(&Path) -> Result<()>) -> bool {
    let unmounted = unmount(dir);
    match std::fs::remove_dir(dir) {
        Ok(()) => {
            if let Err(e) = unmounted {
                tracing::debug!("{} was not mounted: {e:#}", dir.display());
            }
            true
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(rm) => {
            match unmounted {
                Ok(()) => tracing::warn!("could not remove {}: {rm}", dir.display()),
                Err(e) => tracing::error!("{} is still mounted: {e:#}", dir.display()),
            }
            false
        },
    }
}

// ─── Child processes ──────────────────────────────────────────────────────────

/// External tools launched by this process.
///
/// A signal sent to this process alone (not its process group) would
/// otherwise leave a `tar` or `apt-clone` running against a share that is
/// about to be detached.
#[derive(Debug)]
pub struct ChildTracker {
    inner: Mutex<ChildList>,
}

#[derive(Debug)]
struct ChildList {
    pids: Vec<u32>,
    stopping: bool,
}

/// Every tool this process runs goes through here.
pub static CHILDREN: ChildTracker = ChildTracker::new();

impl Default for ChildTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildTracker {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(ChildList {
                pids: Vec::new(),
                stopping: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChildList> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `cmd` to completion with stdout and stderr captured.
    ///
    /// Spawning happens under the lock, so once [`stop_all`](Self::stop_all)
    /// has started no new tool can slip in.
    pub fn output(&self, cmd: &mut Command) -> io::Result<Output> {
        let child = {
            let mut list = self.lock();
            if list.stopping {
                return Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "interrupted; not starting new commands",
                ));
            }
            let child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;
            list.pids.push(child.id());
            child
        };

        let pid = child.id();
        let output = child.wait_with_output();
        self.lock().pids.retain(|&p| p != pid);
        output
    }

    #[cfg(test)]
    fn running(&self) -> Vec<u32> {
        self.lock().pids.clone()
    }

    /// Refuse new commands, SIGTERM the running ones, and SIGKILL whatever
    /// is still alive after `grace`.
    pub fn stop_all(&self, grace: Duration) {
        use nix::{
            sys::signal::{Signal, kill},
            unistd::Pid,
        };

        let pids: Vec<Pid> = {
            let mut list = self.lock();
            list.stopping = true;
            list.pids.iter().map(|&p| Pid::from_raw(p as i32)).collect()
        };
        if pids.is_empty() {
            return;
        }

        for &pid in &pids {
            tracing::debug!("terminating child {pid}");
            let _ = kill(pid, Signal::SIGTERM);
        }

        // Signal 0 only probes for existence.
        let alive = |pid: &&Pid| kill(**pid, None).is_ok();
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && pids.iter().any(|p| alive(&p)) {
            thread::sleep(Duration::from_millis(100));
        }
        for pid in pids.iter().filter(alive) {
            tracing::warn!("child {pid} ignored SIGTERM, killing it");
            let _ = kill(*pid, Signal::SIGKILL);
        }
    }
}

// ─── Signal thread ────────────────────────────────────────────────────────────

/// Spawn the signal-watching thread for `registry`.
pub fn install_signal_handler(registry: &CleanupRegistry) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).context("installing signal handlers")?;
    let registry = registry.clone();

    thread::Builder::new()
        .name("cleanup".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                tracing::warn!("received signal {sig}, cleaning up");
                CHILDREN.stop_all(Duration::from_secs(5));
                registry.release_all(force_unmount);
                std::process::exit(1);
            }
        })
        .context("spawning cleanup thread")?;

    Ok(())
}

/// `umount`, falling back to a lazy unmount when the target is still busy.
fn force_unmount(target: &Path) -> Result<()> {
    let ok = Command::new("umount")
        .arg(target)
        .status()
        .is_ok_and(|s| s.success());
    if ok {
        return Ok(());
    }

    let status = Command::new("umount")
        .arg("-l")
        .arg(target)
        .status()
        .context("failed to spawn umount -l")?;
    if !status.success() {
        anyhow::bail!("umount -l {} exited non-zero", target.display());
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn track_and_untrack() {
        let r = CleanupRegistry::new();
        r.track_mount(Path::new("/tmp/a"));
        r.track_scratch(Path::new("/tmp/b"));
        assert_eq!(r.mounts(), vec![PathBuf::from("/tmp/a")]);

        r.untrack_mount(Path::new("/tmp/a"));
        r.untrack_scratch(Path::new("/tmp/b"));
        assert!(r.mounts().is_empty());
        assert!(r.scratch().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let r = CleanupRegistry::new();
        let c = r.clone();
        c.track_mount(Path::new("/tmp/shared"));
        assert_eq!(r.mounts().len(), 1);
    }

    #[test]
    fn release_unmounts_then_removes_mount_dir() {
        let root = tempfile::tempdir().unwrap();
        let mnt = root.path().join("mnt");
        std::fs::create_dir(&mnt).unwrap();

        let r = CleanupRegistry::new();
        r.track_mount(&mnt);

        let seen = RefCell::new(Vec::new());
        r.release_all(|p| {
            seen.borrow_mut().push(p.to_path_buf());
            Ok(())
        });

        assert_eq!(seen.into_inner(), vec![mnt.clone()]);
        assert!(!mnt.exists());
        assert!(r.mounts().is_empty());
    }

    #[test]
    fn failed_unmount_leaves_directory_and_contents() {
        let root = tempfile::tempdir().unwrap();
        let mnt = root.path().join("mnt");
        std::fs::create_dir(&mnt).unwrap();
        std::fs::write(mnt.join("remote-file"), "precious").unwrap();

        let r = CleanupRegistry::new();
        r.track_mount(&mnt);
        r.release_all(|_| anyhow::bail!("device busy"));

        assert!(mnt.join("remote-file").exists());
    }

    #[test]
    fn interrupt_before_mount_completes_removes_empty_mount_point() {
        let work = tempfile::tempdir().unwrap();
        let mnt = tempfile::Builder::new()
            .prefix("nuckie-backup.")
            .tempdir_in(work.path())
            .unwrap()
            .keep();

        let r = CleanupRegistry::new();
        r.track_mount(&mnt);
        r.release_all(force_unmount);

        assert!(!mnt.exists(), "dangling temporary mount point");
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_unmount_of_empty_dir_still_removes_it() {
        let root = tempfile::tempdir().unwrap();
        let mnt = root.path().join("mnt");
        std::fs::create_dir(&mnt).unwrap();

        assert!(release_mount_point(&mnt, |_| anyhow::bail!("not mounted")));
        assert!(!mnt.exists());
    }

    #[test]
    fn stop_all_terminates_running_child_and_refuses_new_ones() {
        let tracker = Arc::new(ChildTracker::new());
        let handle = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.output(Command::new("sleep").arg("30")))
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        while tracker.running().is_empty() {
            assert!(Instant::now() < deadline, "child never started");
            thread::sleep(Duration::from_millis(20));
        }

        let started = Instant::now();
        tracker.stop_all(Duration::from_secs(5));
        let output = handle.join().unwrap().unwrap();

        assert!(!output.status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(tracker.running().is_empty());

        let err = tracker.output(&mut Command::new("true")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn tracked_output_captures_both_streams() {
        let tracker = ChildTracker::new();
        let out = tracker
            .output(Command::new("sh").args(["-c", "echo hi; echo oops >&2"]))
            .unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "hi\n");
        assert_eq!(String::from_utf8_lossy(&out.stderr), "oops\n");
        assert!(tracker.running().is_empty());
    }

    #[test]
    fn release_removes_scratch_recursively() {
        let root = tempfile::tempdir().unwrap();
        let scratch = root.path().join("iso");
        std::fs::create_dir_all(scratch.join("casper")).unwrap();
        std::fs::write(scratch.join("casper").join("x"), "x").unwrap();

        let r = CleanupRegistry::new();
        r.track_scratch(&scratch);
        r.release_all(|_| Ok(()));

        assert!(!scratch.exists());
    }
}
