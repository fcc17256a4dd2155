//! Runtime configuration.
//!
//! Reads `.env` from the current directory (via dotenvy) and the process
//! environment. Environment variables take precedence over `.env`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mirror hosting the daily-live images and their checksum manifests.
pub const DEFAULT_MIRROR: &str = "https://cdimage.ubuntu.com";

/// Keyserver queried when the distributor keyring is not cached.
pub const DEFAULT_KEYSERVER: &str = "hkp://keyserver.ubuntu.com:80";

/// MBR template shipped by the isolinux package on Debian/Ubuntu hosts.
pub const DEFAULT_ISOHYBRID_MBR: &str = "/usr/lib/ISOLINUX/isohdpfx.bin";

#[derive(Debug, Clone)]
pub struct Config {
    /// Where the cached ISO, manifest, signature and keyring live.
    pub work_dir: PathBuf,
    /// Parent of the per-run scratch directory.
    pub scratch_parent: PathBuf,
    pub mirror: String,
    pub keyserver: String,
    pub isohybrid_mbr: PathBuf,
    pub xorriso: String,
    pub gpg: String,
    /// Per-request HTTP timeout. None waits forever.
    pub http_timeout: Option<Duration>,
}

impl Config {
    /// Load configuration from `.env` and the environment.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // External tools run inside the scratch tree, so every path handed
        // to them is resolved against the directory we were started from
        let work_dir = non_empty("PRESEED_WORK_DIR")
            .map(absolute)
            .unwrap_or_else(default_work_dir);

        let scratch_parent = non_empty("PRESEED_SCRATCH_PARENT")
            .map(absolute)
            .unwrap_or_else(env::temp_dir);

        let mirror = non_empty("PRESEED_MIRROR")
            .map(|m| m.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_MIRROR.to_string());

        let http_timeout = non_empty("PRESEED_HTTP_TIMEOUT").and_then(|s| match s.trim().parse() {
            Ok(secs) => Some(Duration::from_secs(secs)),
            Err(_) => {
                tracing::warn!("ignoring PRESEED_HTTP_TIMEOUT={:?}: not a number of seconds", s);
                None
            }
        });

        Self {
            work_dir,
            scratch_parent,
            mirror,
            keyserver: non_empty("PRESEED_KEYSERVER")
                .unwrap_or_else(|| DEFAULT_KEYSERVER.to_string()),
            isohybrid_mbr: non_empty("PRESEED_ISOHYBRID_MBR")
                .map(absolute)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ISOHYBRID_MBR)),
            xorriso: non_empty("PRESEED_XORRISO")
                .map(tool_path)
                .unwrap_or_else(|| "xorriso".to_string()),
            gpg: non_empty("PRESEED_GPG")
                .map(tool_path)
                .unwrap_or_else(|| "gpg".to_string()),
            http_timeout,
        }
    }

    /// Log the effective configuration.
    pub fn print(&self) {
        tracing::debug!("Configuration:");
        tracing::debug!("  PRESEED_WORK_DIR: {}", self.work_dir.display());
        tracing::debug!("  PRESEED_SCRATCH_PARENT: {}", self.scratch_parent.display());
        tracing::debug!("  PRESEED_MIRROR: {}", self.mirror);
        tracing::debug!("  PRESEED_KEYSERVER: {}", self.keyserver);
        tracing::debug!("  PRESEED_ISOHYBRID_MBR: {}", self.isohybrid_mbr.display());
        tracing::debug!("  PRESEED_XORRISO: {}", self.xorriso);
        tracing::debug!("  PRESEED_GPG: {}", self.gpg);
        match self.http_timeout {
            Some(t) => tracing::debug!("  PRESEED_HTTP_TIMEOUT: {}s", t.as_secs()),
            None => tracing::debug!("  PRESEED_HTTP_TIMEOUT: none"),
        }
    }
}

/// Resolve a relative path against the current directory.
fn absolute(value: String) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        return path;
    }
    match env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// Bare program names stay as-is for a `PATH` lookup; anything with a
/// separator is a path and gets resolved.
fn tool_path(value: String) -> String {
    if value.contains('/') {
        absolute(value).to_string_lossy().into_owned()
    } else {
        value
    }
}

/// Directory containing the running executable, falling back to the cwd.
fn default_work_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
