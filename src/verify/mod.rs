//! Source ISO integrity verification.
//!
//! 1. Download the release's checksum manifest and its detached signature.
//! 2. Fetch the distributor key into a local keyring unless already cached.
//! 3. Verify the manifest signature against that keyring.
//! 4. Require the ISO's SHA-256 to be listed in the manifest.
//!
//! Every step is fatal. The manifest and signature are re-downloaded on each
//! run because the daily manifest changes, and are left in the work directory.

pub mod digest;
pub mod gpg;

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::download::{self, DownloadOptions};
use crate::error::{Error, Result, VerifyStep};
use crate::pipeline::blocking;
use crate::release::ReleaseProfile;

/// On-disk locations of the verification inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationArtifacts {
    pub manifest: PathBuf,
    pub signature: PathBuf,
    pub keyring: PathBuf,
}

impl VerificationArtifacts {
    pub fn in_dir(profile: &ReleaseProfile, work_dir: &Path) -> Self {
        let (manifest, signature) = profile.manifest_file_names();
        Self {
            manifest: work_dir.join(manifest),
            signature: work_dir.join(signature),
            keyring: work_dir.join(profile.keyring_file_name()),
        }
    }
}

/// Verify `source_iso` against the signed manifest for `profile`.
pub async fn verify(source_iso: &Path, profile: &ReleaseProfile, config: &Config) -> Result<()> {
    let artifacts = VerificationArtifacts::in_dir(profile, &config.work_dir);
    let options = DownloadOptions::quiet(config.http_timeout);

    for (url, dest) in [
        (profile.manifest_url(&config.mirror), &artifacts.manifest),
        (profile.signature_url(&config.mirror), &artifacts.signature),
    ] {
        tracing::info!("Downloading {} ...", url);
        download::http(&url, dest, &options)
            .await
            .map_err(|e| Error::download(&url, &e))?;
    }

    let gpg = config.gpg.clone();
    let keyserver = config.keyserver.clone();
    let key_id = profile.gpg_key_id().to_string();
    let source_iso = source_iso.to_path_buf();
    blocking("verify", move || {
        gpg::ensure_keyring(&gpg, &artifacts.keyring, &keyserver, &key_id)
            .map_err(|e| Error::verification(VerifyStep::Keyring, format!("{:#}", e)))?;

        tracing::info!("Verifying {} signature ...", artifacts.manifest.display());
        gpg::verify_detached(
            &gpg,
            &artifacts.keyring,
            &artifacts.signature,
            &artifacts.manifest,
        )
        .map_err(|e| Error::verification(VerifyStep::Signature, format!("{:#}", e)))?;
        tracing::info!("Manifest signature is valid");

        check_digest(&source_iso, &artifacts.manifest)
    })
    .await
}

/// Hash `source_iso` and require the digest to appear in `manifest`.
pub fn check_digest(source_iso: &Path, manifest: &Path) -> Result<()> {
    tracing::info!("Computing SHA-256 of {} ...", source_iso.display());
    let digest = digest::sha256_file(source_iso)
        .map_err(|e| Error::verification(VerifyStep::Digest, format!("{:#}", e)))?;

    let listing = std::fs::read_to_string(manifest)?;
    if !digest::manifest_lists(&listing, &digest) {
        return Err(Error::verification(
            VerifyStep::Digest,
            format!(
                "SHA-256 {} of {} is not listed in {}",
                digest,
                source_iso.display(),
                manifest.display()
            ),
        ));
    }

    tracing::info!("Digest {} found in manifest", digest);
    Ok(())
}
