//! Cleanup when the run is interrupted.
//!
//! The pipeline runs on its own task and may be blocked in xorriso when a
//! signal arrives. [`abort`] kills running tools and removes every
//! `.partial` file still registered, so nothing half-written is left next to
//! the destination or the cached ISO.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::process;

/// `.partial` files currently being written.
#[derive(Debug)]
pub struct PartialRegistry {
    paths: Mutex<BTreeSet<PathBuf>>,
}

static PARTIALS: PartialRegistry = PartialRegistry::new();

impl PartialRegistry {
    pub const fn new() -> Self {
        Self {
            paths: Mutex::new(BTreeSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `path` until the returned guard drops.
    pub fn track(&self, path: &Path) -> PartialFile<'_> {
        self.lock().insert(path.to_path_buf());
        PartialFile {
            registry: self,
            path: path.to_path_buf(),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    /// Delete every registered file. Returns how many were removed.
    pub fn remove_all(&self) -> usize {
        let paths = std::mem::take(&mut *self.lock());
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("could not remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

impl Default for PartialRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a `.partial` path registered while it is being written. Dropping it
/// unregisters the path but leaves the file alone.
#[derive(Debug)]
pub struct PartialFile<'a> {
    registry: &'a PartialRegistry,
    path: PathBuf,
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.path);
    }
}

/// Register a `.partial` file for removal on interrupt.
pub fn track_partial(path: &Path) -> PartialFile<'static> {
    PARTIALS.track(path)
}

/// Kill running external tools and remove registered `.partial` files.
pub fn abort() {
    let killed = process::kill_running();
    let removed = PARTIALS.remove_all();
    tracing::debug!(
        "interrupt cleanup: killed {} process(es), removed {} partial file(s)",
        killed,
        removed
    );
}
