//! Preflight checks.
//!
//! Confirms the host tools and directories a run needs before any stage
//! starts, so a missing xorriso is reported up front rather than after a
//! multi-gigabyte download.

mod environment;
mod host_tools;
mod types;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::release::RepackStrategy;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run every check relevant to this run.
pub fn run_preflight(config: &Config, strategy: RepackStrategy, verify: bool) -> PreflightReport {
    let mut checks = Vec::new();

    checks.push(host_tools::check_tool(
        &config.xorriso,
        "xorriso",
        "Required to extract and build ISO images",
    ));

    if verify {
        checks.push(host_tools::check_tool(
            &config.gpg,
            "gnupg",
            "Required to verify the checksum manifest signature",
        ));
    } else {
        checks.push(CheckResult::skip(&config.gpg, "verification disabled"));
    }

    if strategy == RepackStrategy::SimpleHybrid {
        checks.push(host_tools::check_isohybrid_mbr(&config.isohybrid_mbr));
    }

    checks.push(environment::check_writable_dir("work directory", &config.work_dir));
    checks.push(environment::check_writable_dir(
        "scratch parent",
        &config.scratch_parent,
    ));

    PreflightReport { checks }
}

/// Run preflight and fail with [`Error::MissingPrerequisite`] on any failed check.
pub fn run_preflight_or_fail(config: &Config, strategy: RepackStrategy, verify: bool) -> Result<()> {
    let report = run_preflight(config, strategy, verify);
    report.log();

    if !report.all_passed() {
        return Err(Error::MissingPrerequisite(report.failure_summary()));
    }
    tracing::debug!("all preflight checks passed");
    Ok(())
}
