//! Safety checks before anything is written.
//!
//! Reports must never clobber an input, and a catalog is copied to a
//! timestamped `<file>.backup.<stamp>` before it is rewritten in place. Older
//! backups are never replaced.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Validates that a report path is safe to write.
///
/// Checks:
/// - Extension must be `.json`
/// - Output cannot be the same as any input path (compared after
///   canonicalization when both exist)
/// - Output cannot be a backup file
pub fn validate_report_path(output: &Path, inputs: &[&Path]) -> Result<()> {
    let is_json = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(Error::UnsafeOutput(format!(
            "report '{}' must have a .json extension",
            output.display()
        )));
    }

    for input in inputs {
        if same_file(output, input) {
            return Err(Error::UnsafeOutput(format!(
                "report '{}' cannot be the same as input '{}'",
                output.display(),
                input.display()
            )));
        }
        if is_backup_of(output, input) {
            return Err(Error::UnsafeOutput(format!(
                "report '{}' would overwrite the backup of '{}'",
                output.display(),
                input.display()
            )));
        }
    }

    Ok(())
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// `films.json` + `20261018-101500` -> `films.json.backup.20261018-101500`
pub fn backup_path(path: &Path, stamp: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup.");
    name.push(stamp);
    PathBuf::from(name)
}

fn is_backup_of(output: &Path, input: &Path) -> bool {
    let (Some(out_name), Some(in_name)) = (output.file_name(), input.file_name()) else {
        return false;
    };
    let prefix = format!("{}.backup", in_name.to_string_lossy());
    output.parent() == input.parent() && out_name.to_string_lossy().starts_with(&prefix)
}

/// Copy `path` to a new timestamped backup and return its location.
pub fn create_backup(path: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
    let mut backup = backup_path(path, &stamp);
    let mut n = 1;
    while backup.exists() {
        backup = backup_path(path, &format!("{}-{}", stamp, n));
        n += 1;
    }
    std::fs::copy(path, &backup)?;
    Ok(backup)
}
