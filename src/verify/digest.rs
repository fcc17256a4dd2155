//! ISO digest computation and manifest lookup.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// SHA-256 of a file as lowercase hex, read in 1MB chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for checksum", path.display()))?;

    let file_size = file
        .metadata()
        .with_context(|| format!("Failed to get metadata for {}", path.display()))?
        .len();

    let mut reader = std::io::BufReader::with_capacity(1024 * 1024, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    let mut total_read = 0u64;
    let mut last_percent = 0u64;

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total_read += bytes_read as u64;

        if file_size > 100 * 1024 * 1024 {
            let percent = (total_read * 100) / file_size;
            if percent >= last_percent + 10 {
                tracing::debug!("checksum {}%", percent);
                last_percent = percent;
            }
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// True if some manifest line lists `digest` as its checksum.
///
/// Lines look like `<hex>  *<file>` (sha256sum binary mode) or `<hex>  <file>`.
pub fn manifest_lists(manifest: &str, digest: &str) -> bool {
    let digest = digest.trim();
    !digest.is_empty()
        && manifest.lines().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|hash| hash.eq_ignore_ascii_case(digest))
        })
}
