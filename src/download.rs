//! HTTP downloads.
//!
//! Files are streamed to `<dest>.partial` and renamed into place only after
//! the body has been fully written, so an interrupted transfer never leaves
//! something that looks like a finished download. Failures are not retried.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::interrupt;

/// Download configuration options.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Request timeout. None waits indefinitely.
    pub timeout: Option<Duration>,
    /// Print a progress line while streaming.
    pub show_progress: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            show_progress: true,
        }
    }
}

impl DownloadOptions {
    /// Small files (manifests, signatures): no progress output.
    pub fn quiet(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            show_progress: false,
        }
    }

    pub fn large_file(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            show_progress: true,
        }
    }
}

/// Progress information for a running transfer.
#[derive(Debug, Clone)]
pub struct Progress {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub percent: Option<u8>,
}

impl Progress {
    fn new(downloaded: u64, total: Option<u64>) -> Self {
        let percent = total.map(|t| {
            if t > 0 {
                ((downloaded.min(t) * 100) / t) as u8
            } else {
                0
            }
        });
        Self {
            downloaded,
            total,
            percent,
        }
    }

    /// Format as human-readable string.
    pub fn display(&self) -> String {
        let downloaded_mb = self.downloaded as f64 / (1024.0 * 1024.0);
        match (self.total, self.percent) {
            (Some(total), Some(pct)) => {
                let total_mb = total as f64 / (1024.0 * 1024.0);
                format!("{:.1}/{:.1} MB ({}%)", downloaded_mb, total_mb, pct)
            }
            _ => format!("{:.1} MB", downloaded_mb),
        }
    }
}

/// Path of the in-flight file for `dest`.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dest.with_file_name(name)
}

/// Download `url` to `dest`, replacing any existing file.
pub async fn http(url: &str, dest: &Path, options: &DownloadOptions) -> Result<()> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("preseed-iso/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let partial = partial_path(dest);
    let _tracked = interrupt::track_partial(&partial);
    match fetch_to(&client, url, &partial, options).await {
        Ok(()) => {
            tokio::fs::rename(&partial, dest).await.with_context(|| {
                format!("move {} -> {}", partial.display(), dest.display())
            })?;
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}

async fn fetch_to(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    options: &DownloadOptions,
) -> Result<()> {
    let mut request = client.get(url);
    if let Some(timeout) = options.timeout {
        request = request.timeout(timeout);
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("HTTP request failed: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!(
            "HTTP {} for {}: {}",
            status.as_u16(),
            url,
            status.canonical_reason().unwrap_or("Unknown error")
        );
    }

    let total_size = response.content_length();

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = tokio::io::BufWriter::new(file);

    let mut downloaded = 0u64;
    let mut last_percent = 0u8;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("Failed to read chunk from {}", url))?;
        writer
            .write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write to {}", dest.display()))?;
        downloaded += chunk.len() as u64;

        if options.show_progress {
            let progress = Progress::new(downloaded, total_size);
            if let Some(pct) = progress.percent {
                if pct > last_percent {
                    print!("\r    {}", progress.display());
                    use std::io::Write;
                    std::io::stdout().flush().ok();
                    last_percent = pct;
                }
            }
        }
    }

    writer
        .flush()
        .await
        .with_context(|| format!("Failed to flush {}", dest.display()))?;

    if options.show_progress {
        println!();
    }

    if let Some(expected) = total_size {
        if downloaded != expected {
            bail!(
                "Download incomplete for {}: expected {} bytes, got {} bytes",
                url,
                expected,
                downloaded
            );
        }
    }

    Ok(())
}
