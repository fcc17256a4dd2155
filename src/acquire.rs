//! Source ISO acquisition.

use std::path::{Path, PathBuf};

use time::Date;

use crate::download::{self, DownloadOptions};
use crate::error::{Error, Result};
use crate::release::{Arch, ReleaseProfile};

/// The ISO the pipeline will modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIso {
    pub path: PathBuf,
    /// True when the file was downloaded by this run.
    pub fresh: bool,
}

/// Where the ISO for `profile`/`arch` is cached on `today`.
pub fn default_source_iso_path(
    profile: &ReleaseProfile,
    arch: Arch,
    work_dir: &Path,
    today: Date,
) -> PathBuf {
    work_dir.join(profile.default_iso_name(arch, today))
}

/// Resolve the source ISO, downloading it when neither an explicit path nor a
/// cached copy is available.
pub async fn resolve_source_iso(
    profile: &ReleaseProfile,
    arch: Arch,
    explicit: Option<&Path>,
    work_dir: &Path,
    today: Date,
    mirror: &str,
    options: &DownloadOptions,
) -> Result<SourceIso> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(Error::InvalidArguments(format!(
                "source ISO {} does not exist",
                path.display()
            )));
        }
        tracing::info!("Using source ISO {}", path.display());
        return Ok(SourceIso {
            path: path.to_path_buf(),
            fresh: false,
        });
    }

    let path = default_source_iso_path(profile, arch, work_dir, today);
    if path.is_file() {
        tracing::info!("Using existing {}", path.display());
        return Ok(SourceIso { path, fresh: false });
    }

    let url = profile.iso_url(mirror, arch).ok_or_else(|| {
        Error::InvalidArguments(format!("{} has no {} image", profile.release(), arch))
    })?;

    tracing::info!("Downloading {} ...", url);
    download::http(&url, &path, options)
        .await
        .map_err(|e| Error::download(&url, &e))?;
    tracing::info!("Downloaded {}", path.display());

    Ok(SourceIso { path, fresh: true })
}
