// Allocation and best-effort cleanup of on-disk output artifacts.

use std::{
    fs::{File, TryLockError},
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

const ARTIFACT_PREFIX: &str = "bgremove-";
const ARTIFACT_SUFFIX: &str = ".png";
const RUN_DIR_PREFIX: &str = "run-";
const LOCK_FILE_NAME: &str = ".lock";

/// Hands out uniquely named artifact files inside a per-process run directory.
///
/// Several servers may share one base directory. Each owns a `run-*`
/// subdirectory and holds an exclusive lock on its `.lock` file for as long as
/// the manager lives, so a sweep can tell live runs from abandoned ones.
#[derive(Debug, Clone)]
pub struct TempFileManager {
    base: PathBuf,
    run: Arc<RunDir>,
}

#[derive(Debug)]
struct RunDir {
    path: PathBuf,
    lock: Option<File>,
}

impl Drop for RunDir {
    fn drop(&mut self) {
        // Unlock before removing so the lock file can be deleted everywhere.
        drop(self.lock.take());
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed run dir {}", self.path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove run dir {}: {}", self.path.display(), err),
        }
    }
}

impl TempFileManager {
    /// Creates `base` if needed and a fresh locked run directory inside it.
    pub fn new(base: impl Into<PathBuf>) -> io::Result<Self> {
        let base = base.into();
        std::fs::create_dir_all(&base)?;

        let path = tempfile::Builder::new()
            .prefix(RUN_DIR_PREFIX)
            .tempdir_in(&base)?
            .keep();

        let lock = File::create(path.join(LOCK_FILE_NAME))?;
        lock.lock()?;
        debug!("Created run dir {}", path.display());

        Ok(Self {
            base,
            run: Arc::new(RunDir {
                path,
                lock: Some(lock),
            }),
        })
    }

    /// The shared directory holding every instance's run directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// This process's run directory, where artifacts are allocated.
    pub fn dir(&self) -> &Path {
        &self.run.path
    }

    /// Creates a new empty artifact file. The name is random and the file is
    /// created exclusively, so concurrent allocations never collide.
    pub fn allocate(&self) -> io::Result<Artifact> {
        let temp_path = tempfile::Builder::new()
            .prefix(ARTIFACT_PREFIX)
            .suffix(ARTIFACT_SUFFIX)
            .tempfile_in(self.dir())?
            .into_temp_path();

        // Ownership of deletion moves to `Artifact`.
        let path = temp_path.keep().map_err(|err| err.error)?;
        debug!("Allocated artifact {}", path.display());

        Ok(Artifact { path: Some(path) })
    }

    /// Deletes leftover artifacts: this run's own, loose ones in the base
    /// directory, and the run directories of instances that no longer hold
    /// their lock. Live instances are left alone.
    /// Returns how many artifact files were actually removed.
    pub fn sweep(&self) -> usize {
        let mut removed = sweep_artifacts(self.dir()) + sweep_artifacts(&self.base);

        let entries = match std::fs::read_dir(&self.base) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to read temp dir {}: {}", self.base.display(), err);
                return removed;
            }
        };

        for path in entries.filter_map(Result::ok).map(|entry| entry.path()) {
            if path == self.run.path || !is_run_dir(&path) {
                continue;
            }
            if owner_is_alive(&path) {
                debug!("Skipping run dir {} in use by another instance", path.display());
                continue;
            }
            removed += sweep_artifacts(&path);
            if let Err(err) = std::fs::remove_dir_all(&path) {
                warn!("Failed to remove run dir {}: {}", path.display(), err);
            }
        }

        removed
    }
}

/// Whether another process still holds the lock of the run directory. A run
/// directory without a lock file is treated as live, since its owner may be
/// between creating the directory and locking it.
fn owner_is_alive(run_dir: &Path) -> bool {
    let lock = match File::open(run_dir.join(LOCK_FILE_NAME)) {
        Ok(lock) => lock,
        Err(_) => return true,
    };
    match lock.try_lock() {
        Ok(()) => false,
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Error(err)) => {
            warn!("Failed to check lock of {}: {}", run_dir.display(), err);
            true
        }
    }
}

fn sweep_artifacts(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Failed to read temp dir {}: {}", dir.display(), err);
            return 0;
        }
    };

    let stale: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_artifact_name(path))
        .collect();

    release(&stale)
}

fn is_artifact_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(ARTIFACT_PREFIX) && name.ends_with(ARTIFACT_SUFFIX))
}

fn is_run_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(RUN_DIR_PREFIX))
}

/// Deletes each path if it exists. Failures are logged and swallowed, so this
/// is safe on paths that were never created or were already removed.
/// Returns how many files were deleted by this call.
pub fn release<P: AsRef<Path>>(paths: &[P]) -> usize {
    let mut removed = 0;
    for path in paths {
        let path = path.as_ref();
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed artifact {}", path.display());
                removed += 1;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove artifact {}: {}", path.display(), err),
        }
    }
    removed
}

/// An artifact file on disk, deleted exactly once when the guard is dropped
/// or discarded.
#[derive(Debug)]
pub struct Artifact {
    path: Option<PathBuf>,
}

impl Artifact {
    pub fn path(&self) -> &Path {
        // Only `discard` and `drop` take the path, and both consume the guard.
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    /// Deletes the file now.
    pub fn discard(mut self) {
        if let Some(path) = self.path.take() {
            release(&[path]);
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            release(&[path]);
        }
    }
}

/// Counts artifacts in `dir` and in any run directories directly inside it.
#[cfg(test)]
pub(crate) fn count_artifacts(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .map(|path| {
                    if is_run_dir(&path) {
                        count_artifacts(&path)
                    } else {
                        usize::from(is_artifact_name(&path))
                    }
                })
                .sum()
        })
        .unwrap_or(0)
}
