//! Atomic artifact I/O.
//!
//! Every artifact handed between stages is written to a hidden temp file in
//! the target directory and renamed into place, so a crashed stage never
//! leaves a half-written file for the next one.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{FeedpressError, Result};

/// Write `contents` to `path` via `.{name}.tmp` + rename, creating parents.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| FeedpressError::io(dir, e))?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FeedpressError::validation(format!("not a file path: {}", path.display())))?;
    let temp = dir.join(format!(".{name}.tmp"));

    std::fs::write(&temp, contents).map_err(|e| FeedpressError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| FeedpressError::io(path, e))?;

    tracing::debug!(path = %path.display(), size = contents.len(), "wrote artifact");
    Ok(())
}

/// Pretty-print `value` as JSON and write it atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| FeedpressError::parse(format!("serialize {}: {e}", path.display())))?;
    write_atomic(path, &json)
}

/// Read a JSON artifact. A missing file is an I/O error, bad JSON a parse error.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| FeedpressError::io(path, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| FeedpressError::parse(format!("{}: {e}", path.display())))
}
