//! preseed-iso - unattended-install Ubuntu ISO generator.
//!
//! Takes a daily-live Ubuntu desktop image, verifies it, injects a preseed
//! file into its boot menus and repackages it as a new bootable ISO.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use preseed_iso::config::Config;
use preseed_iso::pipeline::{self, PipelineContext, PipelineOptions};
use preseed_iso::release::{Catalog, Release};
use preseed_iso::scratch::ScratchDir;
use preseed_iso::{interrupt, preflight, Error};

/// Conventional exit status for a run cut short by SIGINT or SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(name = "preseed-iso", version)]
#[command(about = "Build an unattended-install Ubuntu ISO from a preseed file")]
#[command(
    after_help = "Cached downloads, checksum manifests and the GPG keyring live in the work \
directory (PRESEED_WORK_DIR, default: next to the executable).\n\nEXAMPLE:\n  preseed-iso -r JAMMY -p my.seed"
)]
struct Cli {
    /// Log every command and file touched
    #[arg(short, long)]
    verbose: bool,

    /// Preseed file to inject
    #[arg(short, long, value_name = "PATH")]
    preseed: PathBuf,

    /// Skip GPG and checksum verification of the source ISO
    #[arg(short = 'k', long)]
    no_verify: bool,

    /// Use this ISO instead of downloading one
    #[arg(short, long, value_name = "PATH")]
    source: Option<PathBuf>,

    /// Release to build: FOCAL, IMPISH or JAMMY
    #[arg(short, long, value_name = "RELEASE")]
    release: String,

    /// Build the ARM image where the release publishes one
    #[arg(short, long)]
    arm: bool,

    /// Output ISO [default: <work dir>/ubuntu-preseed-<date>.iso]
    #[arg(short, long, value_name = "PATH")]
    destination: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse arguments, mapping every usage error to exit status 1.
fn parse_cli() -> Result<Cli, ExitCode> {
    match Cli::try_parse() {
        Ok(cli) => Ok(cli),
        Err(e) => {
            let _ = e.print();
            match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => Err(ExitCode::SUCCESS),
                _ => Err(ExitCode::FAILURE),
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match parse_cli() {
        Ok(cli) => cli,
        Err(code) => return code,
    };
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let release: Release = cli.release.parse()?;
    let config = Config::load();
    config.print();

    let catalog = Catalog::builtin()
        .map_err(|e| Error::MissingPrerequisite(format!("release catalog: {:#}", e)))?;
    let options = PipelineOptions {
        release,
        preseed: cli.preseed,
        verify: !cli.no_verify,
        source: cli.source,
        prefer_arm: cli.arm,
        destination: cli.destination,
    };
    let ctx = PipelineContext::new(options, &catalog, &config, pipeline::today())?;

    preflight::run_preflight_or_fail(&config, ctx.profile.repack_strategy(), ctx.verify)?;

    let scratch = Arc::new(ScratchDir::create(&config.scratch_parent).map_err(|e| {
        Error::MissingPrerequisite(format!("scratch directory: {:#}", e))
    })?);

    let task = {
        let scratch = Arc::clone(&scratch);
        tokio::spawn(async move { pipeline::run(&ctx, &config, &scratch).await })
    };

    tokio::select! {
        joined = task => {
            match joined {
                Ok(result) => result.map(|_| ()),
                Err(e) => {
                    scratch.release();
                    Err(Error::Io(std::io::Error::other(format!("pipeline task failed: {}", e))))
                }
            }
        }
        () = interrupted() => {
            tracing::warn!("Interrupted, stopping xorriso and removing partial output");
            interrupt::abort();
            scratch.release();
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn interrupted() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
