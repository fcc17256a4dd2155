//! Keyring management and detached-signature checks via gpg.
//!
//! gpg always runs with `--no-default-keyring` so only the dedicated keyring
//! file in the work directory is trusted.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::process::Cmd;

/// gpg resolves relative `--keyring` names against its home directory.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Fetch `key_id` from `keyserver` into `keyring` unless the keyring exists.
///
/// Returns true when a new keyring was created.
pub fn ensure_keyring(gpg: &str, keyring: &Path, keyserver: &str, key_id: &str) -> Result<bool> {
    if keyring.is_file() {
        tracing::info!("Using existing keyring {}", keyring.display());
        return Ok(false);
    }

    let keyring = absolute(keyring)?;
    tracing::info!("Fetching key {} from {} ...", key_id, keyserver);
    Cmd::new(gpg)
        .args(["--batch", "--quiet", "--no-default-keyring", "--keyring"])
        .arg_path(&keyring)
        .args(["--keyserver", keyserver, "--recv-keys", key_id])
        .error_msg(format!("gpg could not receive key {}", key_id))
        .run()?;

    if !keyring.is_file() {
        bail!("gpg reported success but {} was not created", keyring.display());
    }
    tracing::info!("Created keyring {}", keyring.display());
    Ok(true)
}

/// Check `signature` over `data` using only the keys in `keyring`.
pub fn verify_detached(gpg: &str, keyring: &Path, signature: &Path, data: &Path) -> Result<()> {
    let keyring = absolute(keyring)?;
    Cmd::new(gpg)
        .args(["--batch", "--quiet", "--no-default-keyring", "--keyring"])
        .arg_path(&keyring)
        .arg("--verify")
        .arg_path(signature)
        .arg_path(data)
        .error_msg(format!("signature {} did not verify", signature.display()))
        .run()?;
    Ok(())
}
