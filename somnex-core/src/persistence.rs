//! Output persistence: atomic writes for run records and tables, and the
//! file-name rules shared by every artifact written next to the checkpoints.
//!
//! Several fold workers write into the same output directory at once, so every
//! artifact is first written to a `.tmp` sibling and renamed into place.

use std::io;
use std::path::Path;

/// Atomically write raw bytes to a file, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Atomically write `data` as pretty-printed JSON.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}

/// Make a user-supplied label (band name, dataset name) safe to embed in a file name.
///
/// Path separators, whitespace and other characters outside `[A-Za-z0-9._-]`
/// become `_`; an empty label becomes `unnamed`.
pub fn file_component(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}
