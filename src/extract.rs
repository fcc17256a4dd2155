//! ISO extraction into the scratch tree.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::Error;
use crate::process::Cmd;

/// Synthesized boot-catalog directory some extractors produce. It is not part
/// of the logical filesystem and must not be repackaged.
pub const BOOT_CATALOG_ARTIFACT: &str = "[BOOT]";

/// Unpack `source_iso` into the empty directory `tree`.
pub fn extract(source_iso: &Path, tree: &Path, xorriso: &str) -> Result<(), Error> {
    fs::create_dir_all(tree)?;
    if fs::read_dir(tree)?.next().is_some() {
        return Err(Error::ExtractionFailed(format!(
            "{} is not empty",
            tree.display()
        )));
    }

    tracing::info!("Extracting {} ...", source_iso.display());
    Cmd::new(xorriso)
        .args(["-osirrox", "on", "-indev"])
        .arg_path(source_iso)
        .args(["-extract", "/"])
        .arg_path(tree)
        .error_msg(format!("xorriso could not extract {}", source_iso.display()))
        .run()
        .map_err(|e| Error::ExtractionFailed(format!("{:#}", e)))?;

    if fs::read_dir(tree)?.next().is_none() {
        return Err(Error::ExtractionFailed(format!(
            "xorriso extracted nothing from {}",
            source_iso.display()
        )));
    }

    // Files come out read-only; the injector rewrites some of them
    make_owner_writable(tree).map_err(|e| Error::ExtractionFailed(format!("{:#}", e)))?;

    if remove_boot_catalog(tree)? {
        tracing::debug!("removed {} from extracted tree", BOOT_CATALOG_ARTIFACT);
    }

    tracing::info!("Extracted to {}", tree.display());
    Ok(())
}

/// Give the owner read/write (and search on directories) on everything under
/// `root`. Symlinks are left alone.
pub fn make_owner_writable(root: &Path) -> Result<()> {
    // Parents first, so children become reachable before we visit them
    let mut walker = walkdir::WalkDir::new(root).follow_links(false).into_iter();
    loop {
        let entry = match walker.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                // walkdir opens a directory before yielding it, so one we
                // have not chmodded yet fails here. Fix it and descend again.
                let Some(path) = e.path().map(Path::to_path_buf) else {
                    return Err(e).context("walk extracted tree");
                };
                add_mode(&path, 0o700)?;
                fs::read_dir(&path).with_context(|| format!("read {}", path.display()))?;
                make_owner_writable(&path)?;
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        let extra = if file_type.is_dir() { 0o700 } else { 0o600 };
        add_mode(entry.path(), extra)?;
    }
    Ok(())
}

fn add_mode(path: &Path, extra: u32) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("stat {}", path.display()))?;
    let mode = meta.permissions().mode();
    if mode & extra != extra {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | extra))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

/// Remove a top-level `[BOOT]` entry. Returns true if one was present.
pub fn remove_boot_catalog(tree: &Path) -> std::io::Result<bool> {
    let artifact = tree.join(BOOT_CATALOG_ARTIFACT);
    match fs::symlink_metadata(&artifact) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(&artifact).map(|()| true),
        Ok(_) => fs::remove_file(&artifact).map(|()| true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
