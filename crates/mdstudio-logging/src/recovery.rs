//! Recovery file holding records that could not be shipped.
//!
//! Lives at `<component root>/logs/recovery.json` as a JSON array of records.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use mdstudio_core::Result;

use crate::record::Record;

/// Location of the recovery file under a component root.
#[must_use]
pub fn recovery_path(component_root: &Path) -> PathBuf {
    component_root.join("logs").join("recovery.json")
}

/// Read recovered records. A missing or unreadable file yields nothing.
///
/// The file is all or nothing: a single entry that is not a record makes the
/// whole file invalid, and it is ignored.
pub async fn load(component_root: &Path) -> Vec<Record> {
    let path = recovery_path(component_root);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Could not read recovery file: {e}");
            return Vec::new();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring invalid recovery file: {e}");
            Vec::new()
        }
    }
}

/// Persist `records`. Nothing is written for an empty slice.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub async fn store(component_root: &Path, records: &[Record]) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }
    let path = recovery_path(component_root);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let contents = serde_json::to_vec(records)?;
    tokio::fs::write(&path, contents).await?;
    Ok(())
}

/// Delete the recovery file if present.
///
/// # Errors
/// Returns an error for any failure other than the file being absent.
pub async fn remove(component_root: &Path) -> Result<()> {
    match tokio::fs::remove_file(recovery_path(component_root)).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
