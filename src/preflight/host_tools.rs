//! Host tool availability checks.

use std::path::Path;

use crate::process;

use super::types::CheckResult;

/// Check that `tool` resolves to an executable.
pub fn check_tool(tool: &str, package: &str, purpose: &str) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass(tool, &path.display().to_string()),
        None => CheckResult::fail(
            tool,
            &format!("not found. Install the '{}' package. {}", package, purpose),
        ),
    }
}

/// Check the isohybrid MBR template used by the isolinux repack recipe.
pub fn check_isohybrid_mbr(path: &Path) -> CheckResult {
    let name = "isohybrid MBR";
    if path.is_file() {
        CheckResult::pass(name, &path.display().to_string())
    } else {
        CheckResult::fail(
            name,
            &format!(
                "{} not found. Install the 'isolinux' package or set PRESEED_ISOHYBRID_MBR",
                path.display()
            ),
        )
    }
}
