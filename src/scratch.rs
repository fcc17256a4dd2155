//! Per-run scratch directory.
//!
//! Allocated once before the pipeline starts and shared (behind an `Arc`)
//! between the pipeline and the interrupt handler. Whichever side gets there
//! first removes it; later calls are no-ops.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::extract::make_owner_writable;

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: AtomicBool,
}

impl ScratchDir {
    /// Create a fresh `.preseed-scratch-<pid>` directory under `parent`.
    pub fn create(parent: &Path) -> Result<Self> {
        let path = parent.join(format!(".preseed-scratch-{}", std::process::id()));

        // Leftover from a previous run that reused our pid
        if path.exists() {
            remove_tree(&path)?;
        }
        fs::create_dir_all(&path)
            .with_context(|| format!("create scratch directory {}", path.display()))?;

        tracing::debug!("scratch directory {}", path.display());
        Ok(Self {
            path,
            released: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Root of the extracted ISO filesystem.
    pub fn tree(&self) -> PathBuf {
        self.path.join("iso")
    }

    /// Boot images lifted out of the source ISO. Kept outside the tree so they
    /// are never packaged as files.
    pub fn blobs(&self) -> PathBuf {
        self.path.join("boot-images")
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Remove the directory. Runs at most once.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match remove_tree(&self.path) {
            Ok(()) => tracing::debug!("removed scratch directory {}", self.path.display()),
            Err(e) => tracing::warn!(
                "could not remove scratch directory {}: {:#}",
                self.path.display(),
                e
            ),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.release();
    }
}

/// Remove a directory tree, restoring owner write permission if a read-only
/// extracted subtree blocks the first attempt.
fn remove_tree(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if fs::remove_dir_all(path).is_ok() {
        return Ok(());
    }
    make_owner_writable(path)?;
    fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))
}
