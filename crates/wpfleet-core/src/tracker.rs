//! Change tracking and best-effort rollback for file mutations.
//!
//! While recording, every file or directory created is logged and every
//! pre-existing file that gets overwritten or deleted is first saved into a
//! snapshot directory (first write wins). `commit` throws the record away;
//! `rollback` deletes what was created and puts the snapshots back.
//!
//! Containers, certificates and cron lines are outside the tracker and are
//! never reversed.

use crate::error::Result;
use crate::io;
use crate::paths;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Recording,
    Idle,
}

#[derive(Debug, Clone)]
struct Snapshot {
    original: PathBuf,
    saved: PathBuf,
}

#[derive(Debug)]
pub struct ChangeTracker {
    snapshot_dir: PathBuf,
    dry: bool,
    state: TrackerState,
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    snapshots: Vec<Snapshot>,
}

/// What went wrong while undoing a failed command.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub removed: usize,
    pub restored: usize,
    pub problems: Vec<String>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

impl ChangeTracker {
    /// Start recording changes under `deploy_dir`.
    pub fn begin(deploy_dir: &Path) -> Self {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        Self {
            snapshot_dir: deploy_dir.join(paths::ROLLBACK_DIR).join(stamp),
            dry: false,
            state: TrackerState::Recording,
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// A tracker that prints intended operations and touches nothing.
    pub fn dry(deploy_dir: &Path) -> Self {
        Self {
            dry: true,
            ..Self::begin(deploy_dir)
        }
    }

    pub fn is_dry(&self) -> bool {
        self.dry
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn created_files(&self) -> &[PathBuf] {
        &self.created_files
    }

    pub fn created_dirs(&self) -> &[PathBuf] {
        &self.created_dirs
    }

    // ---------------------------------------------------------------------------
    // Recorded operations
    // ---------------------------------------------------------------------------

    /// Create `path` and any missing parents, logging each new directory.
    pub fn create_dir(&mut self, path: &Path) -> Result<()> {
        if self.dry {
            if !path.is_dir() {
                println!("[dry-run] mkdir {}", path.display());
            }
            return Ok(());
        }
        let mut missing: Vec<PathBuf> = path
            .ancestors()
            .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
            .map(Path::to_path_buf)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.reverse();
        io::ensure_dir(path)?;
        self.created_dirs.extend(missing);
        Ok(())
    }

    /// Write `data` to `path`, snapshotting the previous contents first.
    pub fn write(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        if self.dry {
            println!("[dry-run] write {} ({} bytes)", path.display(), data.len());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            self.create_dir(parent)?;
        }
        if path.exists() {
            self.snapshot(path)?;
        } else {
            self.created_files.push(path.to_path_buf());
        }
        io::atomic_write(path, data)
    }

    /// Like [`write`](Self::write) but leaves the file readable by its owner only.
    pub fn write_private(&mut self, path: &Path, data: &[u8]) -> Result<()> {
        self.write(path, data)?;
        if !self.dry {
            io::set_owner_only(path)?;
        }
        Ok(())
    }

    /// Delete a file, keeping a snapshot for rollback. Missing files are ignored.
    pub fn remove_file(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        if self.dry {
            println!("[dry-run] rm {}", path.display());
            return Ok(());
        }
        self.snapshot(path)?;
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Delete a directory tree by moving it into the snapshot directory.
    pub fn remove_dir_all(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        if self.dry {
            println!("[dry-run] rm -r {}", path.display());
            return Ok(());
        }
        let saved = self.next_snapshot_path(path)?;
        if std::fs::rename(path, &saved).is_err() {
            io::copy_dir_all(path, &saved)?;
            std::fs::remove_dir_all(path)?;
        }
        self.snapshots.push(Snapshot {
            original: path.to_path_buf(),
            saved,
        });
        Ok(())
    }

    fn snapshot(&mut self, path: &Path) -> Result<()> {
        let already = self.snapshots.iter().any(|s| s.original == path)
            || self.created_files.iter().any(|p| p == path);
        if already {
            return Ok(());
        }
        let saved = self.next_snapshot_path(path)?;
        std::fs::copy(path, &saved)?;
        self.snapshots.push(Snapshot {
            original: path.to_path_buf(),
            saved,
        });
        Ok(())
    }

    fn next_snapshot_path(&self, original: &Path) -> Result<PathBuf> {
        io::ensure_dir(&self.snapshot_dir)?;
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());
        Ok(self
            .snapshot_dir
            .join(format!("{:04}-{name}", self.snapshots.len())))
    }

    // ---------------------------------------------------------------------------
    // Outcome
    // ---------------------------------------------------------------------------

    /// Keep every change and discard the snapshots.
    pub fn commit(mut self) {
        self.discard_snapshots();
        self.state = TrackerState::Idle;
        tracing::debug!(
            files = self.created_files.len(),
            dirs = self.created_dirs.len(),
            "changes committed"
        );
    }

    /// Undo every recorded change. Problems are logged and collected, never retried.
    pub fn rollback(mut self) -> RollbackReport {
        let mut report = RollbackReport::default();
        if self.dry {
            self.state = TrackerState::Idle;
            return report;
        }

        for file in self.created_files.iter().rev() {
            if !file.exists() {
                continue;
            }
            match std::fs::remove_file(file) {
                Ok(()) => report.removed += 1,
                Err(e) => report
                    .problems
                    .push(format!("could not delete {}: {e}", file.display())),
            }
        }

        for snap in self.snapshots.iter().rev() {
            let restored = if snap.saved.is_dir() {
                if snap.original.exists() {
                    if let Err(e) = std::fs::remove_dir_all(&snap.original) {
                        report.problems.push(format!(
                            "could not clear {} before restoring it: {e}",
                            snap.original.display()
                        ));
                    }
                }
                std::fs::rename(&snap.saved, &snap.original)
                    .or_else(|_| io::copy_dir_all(&snap.saved, &snap.original).map_err(to_io))
            } else {
                std::fs::copy(&snap.saved, &snap.original).map(|_| ())
            };
            match restored {
                Ok(()) => report.restored += 1,
                Err(e) => report
                    .problems
                    .push(format!("could not restore {}: {e}", snap.original.display())),
            }
        }

        self.discard_snapshots();

        // Deepest first so children go before their parents.
        let mut dirs = self.created_dirs.clone();
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
        for dir in dirs {
            if !dir.exists() {
                continue;
            }
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => report.removed += 1,
                Err(e) => report
                    .problems
                    .push(format!("could not delete {}: {e}", dir.display())),
            }
        }

        for problem in &report.problems {
            tracing::warn!("rollback: {problem}");
        }
        tracing::info!(
            removed = report.removed,
            restored = report.restored,
            "rolled back"
        );
        self.state = TrackerState::Idle;
        report
    }

    /// Run `f`, committing on success and rolling back on error.
    pub fn run<T>(mut self, f: impl FnOnce(&mut ChangeTracker) -> Result<T>) -> Result<T> {
        match f(&mut self) {
            Ok(value) => {
                self.commit();
                Ok(value)
            }
            Err(e) => {
                tracing::warn!("command failed, rolling back: {e}");
                self.rollback();
                Err(e)
            }
        }
    }

    fn discard_snapshots(&mut self) {
        if self.snapshot_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.snapshot_dir) {
                tracing::warn!("could not remove {}: {e}", self.snapshot_dir.display());
            }
        }
        // Drop the parent `.rollback/` too once no other snapshot lives there.
        if let Some(parent) = self.snapshot_dir.parent() {
            let _ = std::fs::remove_dir(parent);
        }
    }
}

fn to_io(e: crate::error::FleetError) -> std::io::Error {
    match e {
        crate::error::FleetError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use tempfile::TempDir;

    #[test]
    fn commit_keeps_changes_and_drops_snapshots() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("sites.env");
        std::fs::write(&file, "old").unwrap();

        let mut tx = ChangeTracker::begin(dir.path());
        assert_eq!(tx.state(), TrackerState::Recording);
        tx.write(&file, b"new").unwrap();
        tx.commit();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
        assert!(!dir.path().join(paths::ROLLBACK_DIR).exists());
    }

    #[test]
    fn rollback_restores_first_version_only() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("docker-compose.yml");
        std::fs::write(&file, "original").unwrap();

        let mut tx = ChangeTracker::begin(dir.path());
        tx.write(&file, b"second").unwrap();
        tx.write(&file, b"third").unwrap();
        let report = tx.rollback();

        assert!(report.is_clean());
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
        assert!(!dir.path().join(paths::ROLLBACK_DIR).exists());
    }

    #[test]
    fn rollback_removes_created_dirs_child_first() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("sites/example/wordpress");

        let mut tx = ChangeTracker::begin(dir.path());
        tx.create_dir(&nested).unwrap();
        tx.write(&nested.join("wp-config.php"), b"<?php").unwrap();
        assert_eq!(tx.created_dirs().len(), 3);
        let report = tx.rollback();

        assert!(report.is_clean(), "{:?}", report.problems);
        assert!(!dir.path().join("sites").exists());
    }

    #[test]
    fn rollback_restores_removed_file_and_dir() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("vhost.conf");
        let site = dir.path().join("sites/example");
        std::fs::write(&file, "server {}").unwrap();
        std::fs::create_dir_all(&site).unwrap();
        std::fs::write(site.join("index.php"), "<?php").unwrap();

        let mut tx = ChangeTracker::begin(dir.path());
        tx.remove_file(&file).unwrap();
        tx.remove_dir_all(&site).unwrap();
        assert!(!file.exists());
        assert!(!site.exists());
        tx.rollback();

        assert_eq!(std::fs::read_to_string(&file).unwrap(), "server {}");
        assert_eq!(std::fs::read_to_string(site.join("index.php")).unwrap(), "<?php");
    }

    #[test]
    fn blocked_directory_restore_is_reported() {
        let dir = TempDir::new().unwrap();
        let site = dir.path().join("sites/example");
        std::fs::create_dir_all(&site).unwrap();

        let mut tx = ChangeTracker::begin(dir.path());
        tx.remove_dir_all(&site).unwrap();
        // Something else took the path while the command ran.
        std::fs::write(&site, "not a directory").unwrap();
        let report = tx.rollback();

        assert!(!report.is_clean());
        assert!(report
            .problems
            .iter()
            .any(|p| p.contains("could not clear")));
    }

    #[test]
    fn run_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("sites.env");
        std::fs::write(&registry, "SITE_COUNT=0\n").unwrap();

        let result: Result<()> = ChangeTracker::begin(dir.path()).run(|tx| {
            tx.create_dir(&dir.path().join("sites/example"))?;
            tx.write(&registry, b"SITE_COUNT=1\n")?;
            Err(FleetError::InvalidInput("injected".to_string()))
        });

        assert!(result.is_err());
        assert!(!dir.path().join("sites").exists());
        assert_eq!(std::fs::read_to_string(&registry).unwrap(), "SITE_COUNT=0\n");
    }

    #[test]
    fn dry_tracker_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("nginx/conf.d/example.com.conf");

        let mut tx = ChangeTracker::dry(dir.path());
        tx.create_dir(&dir.path().join("nginx")).unwrap();
        tx.write(&file, b"server {}").unwrap();
        tx.commit();

        assert!(!dir.path().join("nginx").exists());
    }

    #[cfg(unix)]
    #[test]
    fn write_private_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("secrets/db_password.txt");
        let mut tx = ChangeTracker::begin(dir.path());
        tx.write_private(&file, b"pw").unwrap();
        tx.commit();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
