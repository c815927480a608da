//! Filesystem helpers shared across modules.
//!
//! These helpers attach the operation and path to IO errors and keep
//! settings writes crash-safe.

use std::io::Write;
use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Write `data` to `path` atomically.
///
/// The bytes go to a temporary file in the same directory which is then
/// renamed over the target, so readers never observe a partial file.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir_all_sync_with_op("creating directory", dir)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| io_error("creating temp file in", dir, e))?;
    temp_file
        .write_all(data)
        .map_err(|e| io_error("writing", path, e))?;
    temp_file.flush().map_err(|e| io_error("flushing", path, e))?;
    temp_file
        .persist(path)
        .map_err(|e| io_error("replacing", path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        // Only the target remains; the temp file was renamed away.
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn io_errors_carry_the_path() {
        let err = io_error(
            "reading",
            Path::new("/nope/settings.json"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("/nope/settings.json"));
        assert!(err.to_string().contains("reading"));
    }
}
