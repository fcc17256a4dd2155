//! Release catalog.
//!
//! Every supported Ubuntu release is one [`ReleaseProfile`] loaded from the
//! embedded `resources/releases.json`. Stages never branch on the release
//! itself, only on profile data.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context};
use regex::Regex;
use serde::Deserialize;
use time::Date;

use crate::error::Error;

const BUILTIN_CATALOG: &str = include_str!("../resources/releases.json");

/// Supported releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Release {
    Focal,
    Impish,
    Jammy,
}

impl Release {
    pub const ALL: [Release; 3] = [Release::Focal, Release::Impish, Release::Jammy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Release::Focal => "FOCAL",
            Release::Impish => "IMPISH",
            Release::Jammy => "JAMMY",
        }
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Release {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Release::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = Release::ALL.iter().map(Release::as_str).collect();
                Error::InvalidArguments(format!(
                    "unknown release '{}' (expected one of {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// CPU architecture of the install image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the modified tree is turned back into a bootable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepackStrategy {
    /// isolinux + EFI image, MBR taken from the host's isohybrid template.
    SimpleHybrid,
    /// MBR and EFI partition lifted out of the source ISO, appended as GPT.
    MbrEfiPartitionSplit,
    /// No boot-image handling at all.
    Minimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseProfile {
    release: Release,
    codename: String,
    /// Path under the mirror holding the ISO and its manifest.
    path: String,
    iso: BTreeMap<Arch, String>,
    manifest: String,
    signature: String,
    gpg_key_id: String,
    grub_configs: Vec<PathBuf>,
    isolinux_menu: Option<PathBuf>,
    stock_boot_params: String,
    repack: RepackStrategy,
}

impl ReleaseProfile {
    pub fn release(&self) -> Release {
        self.release
    }

    pub fn codename(&self) -> &str {
        &self.codename
    }

    pub fn gpg_key_id(&self) -> &str {
        &self.gpg_key_id
    }

    /// UEFI GRUB configs carrying the stock boot line, relative to the ISO root.
    pub fn grub_configs(&self) -> &[PathBuf] {
        &self.grub_configs
    }

    /// isolinux text menu, for releases that still boot BIOS through isolinux.
    pub fn isolinux_menu(&self) -> Option<&PathBuf> {
        self.isolinux_menu.as_ref()
    }

    pub fn repack_strategy(&self) -> RepackStrategy {
        self.repack
    }

    pub fn supports(&self, arch: Arch) -> bool {
        self.iso.contains_key(&arch)
    }

    /// Pick the architecture to build for. ARM is only honoured where the
    /// release publishes an ARM image.
    pub fn select_arch(&self, prefer_arm: bool) -> Arch {
        if !prefer_arm {
            return Arch::Amd64;
        }
        if self.supports(Arch::Arm64) {
            Arch::Arm64
        } else {
            tracing::warn!(
                "{} has no ARM build, ignoring --arm and using {}",
                self.release,
                Arch::Amd64
            );
            Arch::Amd64
        }
    }

    /// Pattern matching the stock boot-parameter text in the GRUB configs.
    pub fn boot_params_pattern(&self) -> anyhow::Result<Regex> {
        Regex::new(&self.stock_boot_params).with_context(|| {
            format!("invalid stock boot parameter pattern for {}", self.release)
        })
    }

    fn base_url(&self, mirror: &str) -> String {
        format!("{}/{}", mirror.trim_end_matches('/'), self.path)
    }

    pub fn iso_url(&self, mirror: &str, arch: Arch) -> Option<String> {
        self.iso
            .get(&arch)
            .map(|name| format!("{}/{}", self.base_url(mirror), name))
    }

    pub fn manifest_url(&self, mirror: &str) -> String {
        format!("{}/{}", self.base_url(mirror), self.manifest)
    }

    pub fn signature_url(&self, mirror: &str) -> String {
        format!("{}/{}", self.base_url(mirror), self.signature)
    }

    /// File name of the cached source ISO for the given day.
    pub fn default_iso_name(&self, arch: Arch, today: Date) -> String {
        format!("ubuntu-original-{}-{}-{}.iso", self.codename, arch, today)
    }

    /// Local file names for the downloaded manifest and its signature.
    pub fn manifest_file_names(&self) -> (String, String) {
        (
            format!("{}-{}", self.manifest, self.codename),
            format!("{}-{}", self.signature, self.codename),
        )
    }

    /// Local keyring file name for the distributor key.
    pub fn keyring_file_name(&self) -> String {
        format!("{}.keyring", self.gpg_key_id)
    }
}

/// All known release profiles.
#[derive(Debug, Clone)]
pub struct Catalog {
    profiles: Vec<ReleaseProfile>,
}

impl Catalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_json_str(BUILTIN_CATALOG)
    }

    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let profiles: Vec<ReleaseProfile> =
            serde_json::from_str(json).context("parse release catalog")?;

        for profile in &profiles {
            if !profile.supports(Arch::Amd64) {
                bail!("release {} has no amd64 image", profile.release);
            }
            if profile.grub_configs.is_empty() {
                bail!("release {} lists no GRUB configs", profile.release);
            }
            profile.boot_params_pattern()?;
        }

        Ok(Self { profiles })
    }

    pub fn profile(&self, release: Release) -> Result<&ReleaseProfile, Error> {
        self.profiles
            .iter()
            .find(|p| p.release == release)
            .ok_or_else(|| {
                Error::InvalidArguments(format!("release {} is not in the catalog", release))
            })
    }

    pub fn profiles(&self) -> &[ReleaseProfile] {
        &self.profiles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    fn date() -> Date {
        Date::from_calendar_date(2022, Month::April, 21).unwrap()
    }

    #[test]
    fn test_builtin_catalog_covers_every_release() {
        let catalog = Catalog::builtin().unwrap();
        for release in Release::ALL {
            let profile = catalog.profile(release).unwrap();
            assert_eq!(profile.release(), release);
        }
    }

    #[test]
    fn test_release_parse_is_case_insensitive() {
        assert_eq!("jammy".parse::<Release>().unwrap(), Release::Jammy);
        assert_eq!("FOCAL".parse::<Release>().unwrap(), Release::Focal);
        assert_eq!(" Impish ".parse::<Release>().unwrap(), Release::Impish);
    }

    #[test]
    fn test_unknown_release_is_invalid_arguments() {
        let err = "WARTY".parse::<Release>().unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
        assert!(err.to_string().contains("WARTY"));
    }

    #[test]
    fn test_urls() {
        let catalog = Catalog::builtin().unwrap();
        let jammy = catalog.profile(Release::Jammy).unwrap();
        assert_eq!(
            jammy.iso_url("https://cdimage.ubuntu.com/", Arch::Amd64).unwrap(),
            "https://cdimage.ubuntu.com/jammy/daily-live/current/jammy-desktop-amd64.iso"
        );
        assert_eq!(
            jammy.manifest_url("https://cdimage.ubuntu.com"),
            "https://cdimage.ubuntu.com/jammy/daily-live/current/SHA256SUMS"
        );
        assert_eq!(
            jammy.signature_url("https://cdimage.ubuntu.com"),
            "https://cdimage.ubuntu.com/jammy/daily-live/current/SHA256SUMS.gpg"
        );
    }

    #[test]
    fn test_arm_only_where_supported() {
        let catalog = Catalog::builtin().unwrap();
        let focal = catalog.profile(Release::Focal).unwrap();
        let jammy = catalog.profile(Release::Jammy).unwrap();
        assert_eq!(focal.select_arch(true), Arch::Amd64);
        assert_eq!(jammy.select_arch(true), Arch::Arm64);
        assert_eq!(jammy.select_arch(false), Arch::Amd64);
        assert!(focal.iso_url("http://m", Arch::Arm64).is_none());
    }

    #[test]
    fn test_default_iso_name_is_deterministic() {
        let catalog = Catalog::builtin().unwrap();
        for profile in catalog.profiles() {
            for arch in [Arch::Amd64, Arch::Arm64] {
                if !profile.supports(arch) {
                    continue;
                }
                let a = profile.default_iso_name(arch, date());
                let b = profile.default_iso_name(arch, date());
                assert_eq!(a, b);
                assert!(a.ends_with("-2022-04-21.iso"), "{}", a);
                assert!(a.contains(arch.as_str()));
            }
        }
    }

    #[test]
    fn test_strategies_differ_per_release() {
        let catalog = Catalog::builtin().unwrap();
        let strategy = |r| catalog.profile(r).unwrap().repack_strategy();
        assert_eq!(strategy(Release::Focal), RepackStrategy::SimpleHybrid);
        assert_eq!(strategy(Release::Impish), RepackStrategy::Minimal);
        assert_eq!(strategy(Release::Jammy), RepackStrategy::MbrEfiPartitionSplit);
    }

    #[test]
    fn test_only_focal_has_isolinux_menu() {
        let catalog = Catalog::builtin().unwrap();
        assert!(catalog.profile(Release::Focal).unwrap().isolinux_menu().is_some());
        assert!(catalog.profile(Release::Impish).unwrap().isolinux_menu().is_none());
        assert!(catalog.profile(Release::Jammy).unwrap().isolinux_menu().is_none());
    }

    #[test]
    fn test_stock_pattern_matches_both_grub_variants() {
        let catalog = Catalog::builtin().unwrap();
        let re = catalog
            .profile(Release::Jammy)
            .unwrap()
            .boot_params_pattern()
            .unwrap();
        assert!(re.is_match("linux /casper/vmlinuz file=/cdrom/preseed/ubuntu.seed maybe-ubiquity quiet splash ---"));
        assert!(re.is_match(
            "linux /casper/vmlinuz file=/cdrom/preseed/ubuntu.seed maybe-ubiquity iso-scan/filename=${iso_path} quiet splash ---"
        ));
    }

    #[test]
    fn test_catalog_rejects_bad_pattern() {
        let json = r#"[{
            "release": "JAMMY", "codename": "jammy", "path": "jammy",
            "iso": {"amd64": "x.iso"}, "manifest": "S", "signature": "S.gpg",
            "gpg_key_id": "ABCD", "grub_configs": ["boot/grub/grub.cfg"],
            "isolinux_menu": null, "stock_boot_params": "(unclosed",
            "repack": "minimal"
        }]"#;
        assert!(Catalog::from_json_str(json).is_err());
    }
}
