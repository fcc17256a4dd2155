//! The end-to-end run: acquire, verify, extract, inject, repack.
//!
//! Stages run strictly in order and the first failure ends the run. Stages
//! that block on external tools or hash large files run on tokio's blocking
//! pool, so the runtime and the interrupt handler in `main` stay live.

use std::fs::File;
use std::path::{Path, PathBuf};

use time::Date;

use crate::acquire::{self, SourceIso};
use crate::config::Config;
use crate::download::DownloadOptions;
use crate::error::{Error, Result};
use crate::extract;
use crate::inject;
use crate::release::{Arch, Catalog, Release, ReleaseProfile};
use crate::repack::{self, RepackInputs};
use crate::scratch::ScratchDir;
use crate::timing::Timer;
use crate::verify;

/// What the user asked for on the command line.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub release: Release,
    pub preseed: PathBuf,
    pub verify: bool,
    pub source: Option<PathBuf>,
    pub prefer_arm: bool,
    pub destination: Option<PathBuf>,
}

/// Everything resolved before the first stage runs.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub profile: ReleaseProfile,
    pub arch: Arch,
    pub preseed: PathBuf,
    pub verify: bool,
    pub source: Option<PathBuf>,
    pub destination: PathBuf,
    pub today: Date,
}

/// `<work_dir>/ubuntu-preseed-<today>.iso`
pub fn default_destination(work_dir: &Path, today: Date) -> PathBuf {
    work_dir.join(format!("ubuntu-preseed-{}.iso", today))
}

/// Today's date in UTC; names cached downloads and the output.
pub fn today() -> Date {
    time::OffsetDateTime::now_utc().date()
}

impl PipelineContext {
    pub fn new(
        options: PipelineOptions,
        catalog: &Catalog,
        config: &Config,
        today: Date,
    ) -> Result<Self> {
        let profile = catalog.profile(options.release)?.clone();

        if let Err(e) = File::open(&options.preseed) {
            return Err(Error::InvalidArguments(format!(
                "preseed file {} is not readable: {}",
                options.preseed.display(),
                e
            )));
        }
        if options.preseed.is_dir() {
            return Err(Error::InvalidArguments(format!(
                "preseed file {} is a directory",
                options.preseed.display()
            )));
        }

        let arch = profile.select_arch(options.prefer_arm);
        let destination = options
            .destination
            .unwrap_or_else(|| default_destination(&config.work_dir, today));

        Ok(Self {
            profile,
            arch,
            preseed: options.preseed,
            verify: options.verify,
            source: options.source,
            destination,
            today,
        })
    }
}

/// Run a blocking stage on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(stage: &str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        Error::Io(std::io::Error::other(format!("{} task failed: {}", stage, e)))
    })?
}

/// Run every stage. `scratch` is released before returning, whatever the
/// outcome.
pub async fn run(ctx: &PipelineContext, config: &Config, scratch: &ScratchDir) -> Result<PathBuf> {
    let result = run_stages(ctx, config, scratch).await;
    scratch.release();
    result
}

async fn run_stages(ctx: &PipelineContext, config: &Config, scratch: &ScratchDir) -> Result<PathBuf> {
    let profile = &ctx.profile;
    tracing::info!(
        "Building {} ({}) preseed ISO for {}",
        profile.release(),
        profile.codename(),
        ctx.arch
    );

    let timer = Timer::start("Acquire");
    let source: SourceIso = acquire::resolve_source_iso(
        profile,
        ctx.arch,
        ctx.source.as_deref(),
        &config.work_dir,
        ctx.today,
        &config.mirror,
        &DownloadOptions::large_file(config.http_timeout),
    )
    .await?;
    timer.finish();

    if ctx.verify {
        if !source.fresh {
            tracing::warn!(
                "Verifying an ISO that was not downloaded by this run against today's manifest; \
                 an older daily build will fail the digest check"
            );
        }
        let timer = Timer::start("Verify");
        verify::verify(&source.path, profile, config).await?;
        timer.finish();
    } else {
        tracing::warn!("Verification of the source ISO is disabled");
    }

    let tree = scratch.tree();

    let timer = Timer::start("Extract");
    {
        let (iso, tree, xorriso) = (source.path.clone(), tree.clone(), config.xorriso.clone());
        blocking("extract", move || extract::extract(&iso, &tree, &xorriso)).await?;
    }
    timer.finish();

    let timer = Timer::start("Inject");
    {
        let (tree, preseed, profile) = (tree.clone(), ctx.preseed.clone(), profile.clone());
        blocking("inject", move || inject::inject(&tree, &preseed, &profile)).await?;
    }
    timer.finish();

    let timer = Timer::start("Repack");
    {
        let strategy = profile.repack_strategy();
        let source_iso = source.path.clone();
        let blobs = scratch.blobs();
        let destination = ctx.destination.clone();
        let volume_label = repack::volume_label(ctx.today);
        let isohybrid_mbr = config.isohybrid_mbr.clone();
        let xorriso = config.xorriso.clone();
        blocking("repack", move || {
            repack::repack(&RepackInputs {
                strategy,
                source_iso: &source_iso,
                tree: &tree,
                blobs: &blobs,
                destination: &destination,
                volume_label,
                isohybrid_mbr: &isohybrid_mbr,
                xorriso: &xorriso,
            })
        })
        .await?;
    }
    timer.finish();

    tracing::info!("Created {}", ctx.destination.display());
    Ok(ctx.destination.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use time::Month;

    fn date() -> Date {
        Date::from_calendar_date(2022, Month::April, 21).unwrap()
    }

    fn config(work: &Path) -> Config {
        let env: HashMap<&str, String> =
            [("PRESEED_WORK_DIR", work.display().to_string())].into_iter().collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    fn options(preseed: PathBuf) -> PipelineOptions {
        PipelineOptions {
            release: Release::Jammy,
            preseed,
            verify: false,
            source: None,
            prefer_arm: false,
            destination: None,
        }
    }

    #[test]
    fn test_default_destination() {
        assert_eq!(
            default_destination(Path::new("/w"), date()),
            PathBuf::from("/w/ubuntu-preseed-2022-04-21.iso")
        );
    }

    #[test]
    fn test_context_resolves_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let preseed = tmp.path().join("a.seed");
        std::fs::write(&preseed, "d-i").unwrap();
        let catalog = Catalog::builtin().unwrap();

        let mut opts = options(preseed);
        opts.prefer_arm = true;
        let ctx = PipelineContext::new(opts, &catalog, &config(tmp.path()), date()).unwrap();
        assert_eq!(ctx.arch, Arch::Arm64);
        assert_eq!(ctx.destination, default_destination(tmp.path(), date()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_stage_leaves_runtime_responsive() {
        let started = std::time::Instant::now();
        let stage = blocking("sleep", || {
            std::thread::sleep(std::time::Duration::from_millis(1500));
            Ok(7)
        });
        let ticker = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            started.elapsed()
        };

        let (value, ticked_after) = tokio::join!(stage, ticker);
        assert_eq!(value.unwrap(), 7);
        assert!(
            ticked_after < std::time::Duration::from_millis(1000),
            "timer starved for {:?}",
            ticked_after
        );
    }

    #[tokio::test]
    async fn test_blocking_stage_panic_is_error() {
        let err = blocking::<(), _>("inject", || panic!("boom")).await.unwrap_err();
        assert!(err.to_string().contains("inject task failed"), "{}", err);
    }

    #[test]
    fn test_unreadable_preseed_is_invalid_arguments() {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = Catalog::builtin().unwrap();
        let err = PipelineContext::new(
            options(tmp.path().join("missing.seed")),
            &catalog,
            &config(tmp.path()),
            date(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));

        let err = PipelineContext::new(
            options(tmp.path().to_path_buf()),
            &catalog,
            &config(tmp.path()),
            date(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArguments(_)));
    }
}
