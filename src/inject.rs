//! Preseed injection into the extracted tree.
//!
//! Touches exactly: the release's UEFI GRUB configs, its isolinux text menu
//! (if it has one), the injected seed file, and `md5sum.txt`.

use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use regex::{Captures, Regex};

use crate::error::{Error, Result};
use crate::release::ReleaseProfile;

/// Where the caller's preseed file lands, relative to the ISO root.
pub const INJECTED_SEED: &str = "preseed/custom.seed";

/// Kernel parameters selecting the injected seed for an unattended install.
const UNATTENDED_PARAMS: &str =
    "file=/cdrom/preseed/custom.seed auto=true priority=critical boot=casper automatic-ubiquity";

/// Boot-time integrity manifest checked by casper.
pub const MD5_MANIFEST: &str = "md5sum.txt";

/// The single BIOS menu entry written for isolinux releases.
const ISOLINUX_MENU: &str = "\
default live-install
label live-install
  menu label ^Install Ubuntu
  kernel /casper/vmlinuz
  append  file=/cdrom/preseed/custom.seed auto=true priority=critical boot=casper automatic-ubiquity initrd=/casper/initrd quiet splash noprompt noshell ---
";

/// What happened to one GRUB config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// This many stock boot lines were rewritten.
    Patched(usize),
    /// The file already points at the injected seed.
    AlreadyPatched,
}

/// Rewrite every stock boot-parameter occurrence in `content`.
///
/// Returns the new text and the number of replacements. An `iso-scan`
/// parameter in the stock text is carried over unchanged.
pub fn rewrite_boot_params(content: &str, stock: &Regex) -> (String, usize) {
    let mut count = 0;
    let rewritten = stock.replace_all(content, |caps: &Captures| {
        count += 1;
        let iso_scan = caps.name("iso_scan").map_or("", |m| m.as_str());
        format!("{}{} quiet splash noprompt noshell", UNATTENDED_PARAMS, iso_scan)
    });
    (rewritten.into_owned(), count)
}

/// Patch one GRUB config in place.
pub fn patch_grub_config(path: &Path, stock: &Regex) -> Result<PatchOutcome> {
    let content = fs::read_to_string(path).map_err(|e| Error::PatchNotApplied {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let (rewritten, count) = rewrite_boot_params(&content, stock);
    if count == 0 {
        if content.contains(UNATTENDED_PARAMS) {
            return Ok(PatchOutcome::AlreadyPatched);
        }
        return Err(Error::PatchNotApplied {
            path: path.to_path_buf(),
            reason: format!("stock boot line matching '{}' not found", stock.as_str()),
        });
    }

    fs::write(path, rewritten)?;
    Ok(PatchOutcome::Patched(count))
}

/// MD5 of a file as lowercase hex.
pub fn md5_file(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", Md5::digest(&bytes)))
}

/// Replace `md5sum.txt` with entries for `files` only.
///
/// A full-tree manifest makes casper's boot-time check crawl every file, so
/// the replacement covers just the configs we rewrote.
pub fn write_md5_manifest(tree: &Path, files: &[PathBuf]) -> Result<()> {
    let mut manifest = String::new();
    for rel in files {
        let md5 = md5_file(&tree.join(rel))?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        manifest.push_str(&format!("{}  ./{}\n", md5, rel));
    }
    fs::write(tree.join(MD5_MANIFEST), manifest)?;
    Ok(())
}

/// Inject `preseed` into the extracted `tree` for `profile`.
pub fn inject(tree: &Path, preseed: &Path, profile: &ReleaseProfile) -> Result<()> {
    let stock = profile.boot_params_pattern().map_err(|e| Error::PatchNotApplied {
        path: PathBuf::new(),
        reason: format!("{:#}", e),
    })?;

    tracing::info!("Adding preseed parameters to kernel command lines ...");
    for rel in profile.grub_configs() {
        let path = tree.join(rel);
        match patch_grub_config(&path, &stock)? {
            PatchOutcome::Patched(n) => {
                tracing::debug!("{}: rewrote {} boot line(s)", rel.display(), n)
            }
            PatchOutcome::AlreadyPatched => {
                tracing::debug!("{}: already patched", rel.display())
            }
        }
    }

    match profile.isolinux_menu() {
        Some(rel) => {
            let path = tree.join(rel);
            if !path.is_file() {
                return Err(Error::PatchNotApplied {
                    path,
                    reason: "isolinux menu not found in extracted tree".to_string(),
                });
            }
            fs::write(&path, ISOLINUX_MENU)?;
            tracing::debug!("{}: replaced with unattended entry", rel.display());
        }
        None => tracing::debug!("{} boots BIOS without isolinux, skipping text menu", profile.release()),
    }
    tracing::info!("Added parameters to UEFI and BIOS kernel command lines");

    let seed = tree.join(INJECTED_SEED);
    if let Some(parent) = seed.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(preseed, &seed).map_err(|e| {
        Error::InvalidArguments(format!("cannot copy preseed file {}: {}", preseed.display(), e))
    })?;
    tracing::info!("Added preseed file as {}", INJECTED_SEED);

    write_md5_manifest(tree, profile.grub_configs())?;
    tracing::info!("Updated {} with hashes of modified files", MD5_MANIFEST);
    Ok(())
}
