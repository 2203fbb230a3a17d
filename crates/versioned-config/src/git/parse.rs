//! Git output parsing helpers.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Output;

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git diff --name-status -z` output into the affected paths.
///
/// Added files are reported under their new path; every other status
/// (modified, deleted, type change, and the source side of renames and
/// copies) is reported under the old path.
pub fn parse_name_status(raw: &[u8]) -> BTreeSet<PathBuf> {
    let text = String::from_utf8_lossy(raw);
    let mut fields = text.split('\0').filter(|f| !f.is_empty());
    let mut paths = BTreeSet::new();

    while let Some(status) = fields.next() {
        let Some(first) = fields.next() else {
            break;
        };
        // Renames and copies list source then destination
        if status.starts_with('R') || status.starts_with('C') {
            fields.next();
        }
        paths.insert(PathBuf::from(first));
    }

    paths
}
