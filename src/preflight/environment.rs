//! Directory checks.

use std::fs;
use std::path::Path;

use super::types::CheckResult;

/// Check that `dir` exists (creating it if needed) and accepts new files.
pub fn check_writable_dir(name: &str, dir: &Path) -> CheckResult {
    if let Err(e) = fs::create_dir_all(dir) {
        return CheckResult::fail(name, &format!("cannot create {}: {}", dir.display(), e));
    }

    let marker = dir.join(format!(".preflight-test-{}", std::process::id()));
    match fs::write(&marker, "test") {
        Ok(()) => {
            let _ = fs::remove_file(&marker);
            CheckResult::pass(name, &dir.display().to_string())
        }
        Err(e) => CheckResult::fail(name, &format!("cannot write to {}: {}", dir.display(), e)),
    }
}
