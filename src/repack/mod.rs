//! Repackaging the modified tree into a bootable ISO.
//!
//! Each [`RepackStrategy`] maps to one xorriso recipe. xorriso runs with the
//! tree as its working directory and writes `<dest>.partial`, which is renamed
//! into place only on success.

pub mod partition;

use std::fs;
use std::path::{Path, PathBuf};

use time::Date;

use crate::download::partial_path;
use crate::error::{Error, Result};
use crate::interrupt;
use crate::process::Cmd;
use crate::release::RepackStrategy;

/// GPT type GUID xorriso writes for the appended EFI partition.
const APPENDED_EFI_TYPE: &str = "28732ac11ff8d211ba4b00a0c93ec93b";
/// MBR partition type for the ISO data partition (Microsoft basic data).
const ISO_MBR_PART_TYPE: &str = "a2a0d0ebe5b9334487c068b6b72699c7";

/// File names of the boot images lifted out of the source ISO.
pub const MBR_TEMPLATE_FILE: &str = "mbr.img";
pub const EFI_PARTITION_FILE: &str = "efi.img";

/// Volume label of the generated ISO.
pub fn volume_label(today: Date) -> String {
    format!("ubuntu-preseed-{}", today)
}

/// Everything a recipe needs besides the tree itself.
#[derive(Debug, Clone)]
pub struct RepackInputs<'a> {
    pub strategy: RepackStrategy,
    pub source_iso: &'a Path,
    pub tree: &'a Path,
    /// Scratch location for boot images; never inside `tree`.
    pub blobs: &'a Path,
    pub destination: &'a Path,
    pub volume_label: String,
    pub isohybrid_mbr: &'a Path,
    pub xorriso: &'a str,
}

/// Make `path` absolute against the current directory, since xorriso runs
/// inside the tree.
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Arguments for the isolinux + EFI image recipe.
pub fn simple_hybrid_args(label: &str, isohybrid_mbr: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-as", "mkisofs", "-r", "-V", label, "-J",
        "-b", "isolinux/isolinux.bin",
        "-c", "isolinux/boot.cat",
        "-no-emul-boot", "-boot-load-size", "4",
        "-isohybrid-mbr",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(isohybrid_mbr.to_string_lossy().into_owned());
    args.extend(
        [
            "-boot-info-table", "-input-charset", "utf-8",
            "-eltorito-alt-boot",
            "-e", "boot/grub/efi.img",
            "-no-emul-boot", "-isohybrid-gpt-basdat",
            "-o",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args.push(".".to_string());
    args
}

/// Arguments for the GRUB2 MBR + appended EFI partition recipe.
pub fn partition_split_args(label: &str, mbr: &Path, efi: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = ["-as", "mkisofs", "-r", "-V", label, "-J", "--grub2-mbr"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(mbr.to_string_lossy().into_owned());
    args.extend(
        [
            "-partition_offset", "16",
            "--mbr-force-bootable",
            "-append_partition", "2", APPENDED_EFI_TYPE,
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(efi.to_string_lossy().into_owned());
    args.extend(
        [
            "-appended_part_as_gpt",
            "-iso_mbr_part_type", ISO_MBR_PART_TYPE,
            "-c", "/boot.catalog",
            "-b", "/boot/grub/i386-pc/eltorito.img",
            "-no-emul-boot", "-boot-load-size", "4", "-boot-info-table",
            "--grub2-boot-info",
            "-eltorito-alt-boot",
            "-e", "--interval:appended_partition_2:::",
            "-no-emul-boot",
            "-o",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(output.to_string_lossy().into_owned());
    args.push(".".to_string());
    args
}

/// Arguments for the recipe with no boot-image handling.
pub fn minimal_args(label: &str, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-as", "mkisofs", "-r", "-V", label, "-J", "-joliet-long", "-iso-level", "3", "-o",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(output.to_string_lossy().into_owned());
    args.push(".".to_string());
    args
}

/// Build the xorriso argument list for `inputs`, preparing boot images first
/// where the recipe needs them.
fn recipe_args(inputs: &RepackInputs<'_>, output: &Path) -> anyhow::Result<Vec<String>> {
    let label = inputs.volume_label.as_str();
    match inputs.strategy {
        RepackStrategy::SimpleHybrid => {
            let isohybrid_mbr = absolute(inputs.isohybrid_mbr)?;
            Ok(simple_hybrid_args(label, &isohybrid_mbr, output))
        }
        RepackStrategy::MbrEfiPartitionSplit => {
            let blobs = absolute(inputs.blobs)?;
            fs::create_dir_all(&blobs)?;
            let mbr = blobs.join(MBR_TEMPLATE_FILE);
            let efi = blobs.join(EFI_PARTITION_FILE);

            partition::extract_mbr_template(inputs.source_iso, &mbr)?;
            let extent = partition::find_efi_partition(inputs.source_iso)?;
            partition::extract_partition(inputs.source_iso, extent, &efi)?;
            tracing::debug!(
                "lifted MBR template and EFI partition ({} sectors at {})",
                extent.sector_count,
                extent.start_sector
            );

            Ok(partition_split_args(label, &mbr, &efi, output))
        }
        RepackStrategy::Minimal => Ok(minimal_args(label, output)),
    }
}

/// Produce the final ISO at `inputs.destination`.
pub fn repack(inputs: &RepackInputs<'_>) -> Result<()> {
    let destination = absolute(inputs.destination)?;
    let partial = partial_path(&destination);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    let _ = fs::remove_file(&partial);
    let _tracked = interrupt::track_partial(&partial);

    tracing::info!("Repackaging into {} ...", destination.display());
    let result = recipe_args(inputs, &partial).and_then(|args| {
        Cmd::new(inputs.xorriso)
            .args(&args)
            .dir(inputs.tree)
            .error_msg("xorriso failed to build the ISO")
            .run()
            .map(|_| ())
    });

    if let Err(e) = result {
        let _ = fs::remove_file(&partial);
        return Err(Error::RepackagingFailed(format!("{:#}", e)));
    }
    if !partial.is_file() {
        return Err(Error::RepackagingFailed(format!(
            "xorriso reported success but wrote no {}",
            partial.display()
        )));
    }

    fs::rename(&partial, &destination).map_err(|e| {
        let _ = fs::remove_file(&partial);
        Error::RepackagingFailed(format!("rename to {}: {}", destination.display(), e))
    })?;
    tracing::info!("Repackaged as {}", destination.display());
    Ok(())
}
