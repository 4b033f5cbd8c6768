//! On-disk layout of a persisted collection.
//!
//! ```text
//! <location>/<collection>/manifest.json   format version, dimensions, count, checksum
//! <location>/<collection>/entries.jsonl   one IndexEntry per line, insertion order
//! ```
//!
//! Collections are written into a hidden sibling directory and renamed into
//! place, so a partially written collection never carries a valid manifest.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use super::IndexEntry;
use crate::error::{RagError, Result};

const MANIFEST_FILE: &str = "manifest.json";
const ENTRIES_FILE: &str = "entries.jsonl";
const FORMAT_VERSION: u32 = 1;

/// Summary of a persisted collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Layout version of the collection directory.
    pub format_version: u32,
    /// Collection name the data was written for.
    pub collection: String,
    /// Dimensionality shared by every stored vector.
    pub dimensions: usize,
    /// Number of lines in the entries file.
    pub entry_count: usize,
    /// Hex SHA-256 of the entries file.
    pub entries_sha256: String,
    /// When the collection was built.
    pub created_at: DateTime<Utc>,
}

/// The directory holding `collection` under `location`.
pub fn collection_dir(location: &Path, collection: &str) -> PathBuf {
    location.join(collection)
}

/// Reject collection names that would escape the storage location.
pub fn validate_collection_name(collection: &str) -> Result<()> {
    let invalid = collection.is_empty()
        || collection.starts_with('.')
        || collection.contains(['/', '\\'])
        || collection.chars().any(char::is_control);
    if invalid {
        return Err(RagError::ConfigError(format!("invalid collection name '{collection}'")));
    }
    Ok(())
}

/// Whether anything has been persisted for the collection.
///
/// A missing or empty directory counts as nothing persisted.
pub fn has_data(dir: &Path) -> Result<bool> {
    match fs::read_dir(dir) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RagError::storage(dir, format!("failed to read directory: {e}"))),
    }
}

/// Load and verify a persisted collection.
///
/// Returns `Ok(None)` when nothing is persisted; any inconsistency in a
/// non-empty directory is a [`RagError::StorageError`].
pub fn read_collection(
    dir: &Path,
    collection: &str,
) -> Result<Option<(Manifest, Vec<IndexEntry>)>> {
    if !has_data(dir)? {
        return Ok(None);
    }

    let manifest_path = dir.join(MANIFEST_FILE);
    let raw = fs::read_to_string(&manifest_path)
        .map_err(|e| RagError::storage(dir, format!("cannot read {MANIFEST_FILE}: {e}")))?;
    let manifest: Manifest = serde_json::from_str(&raw)
        .map_err(|e| RagError::storage(dir, format!("malformed {MANIFEST_FILE}: {e}")))?;

    if manifest.format_version != FORMAT_VERSION {
        return Err(RagError::storage(
            dir,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }
    if manifest.collection != collection {
        return Err(RagError::storage(
            dir,
            format!("manifest belongs to collection '{}'", manifest.collection),
        ));
    }

    let bytes = fs::read(dir.join(ENTRIES_FILE))
        .map_err(|e| RagError::storage(dir, format!("cannot read {ENTRIES_FILE}: {e}")))?;
    let checksum = sha256_hex(&bytes);
    if checksum != manifest.entries_sha256 {
        return Err(RagError::storage(dir, format!("{ENTRIES_FILE} checksum mismatch")));
    }

    let text = std::str::from_utf8(&bytes)
        .map_err(|e| RagError::storage(dir, format!("{ENTRIES_FILE} is not UTF-8: {e}")))?;
    let mut entries = Vec::with_capacity(manifest.entry_count);
    for (line_no, line) in text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let entry: IndexEntry = serde_json::from_str(line).map_err(|e| {
            RagError::storage(dir, format!("malformed entry on line {}: {e}", line_no + 1))
        })?;
        if entry.vector.len() != manifest.dimensions {
            return Err(RagError::storage(
                dir,
                format!(
                    "entry '{}' has {} dimensions, manifest declares {}",
                    entry.chunk_id,
                    entry.vector.len(),
                    manifest.dimensions
                ),
            ));
        }
        entries.push(entry);
    }

    if entries.len() != manifest.entry_count {
        return Err(RagError::storage(
            dir,
            format!("expected {} entries, found {}", manifest.entry_count, entries.len()),
        ));
    }

    debug!(dir = %dir.display(), entry_count = entries.len(), "collection loaded");
    Ok(Some((manifest, entries)))
}

/// Persist a collection, replacing existing data only when `overwrite` is set.
pub fn write_collection(
    location: &Path,
    collection: &str,
    dimensions: usize,
    entries: &[IndexEntry],
    overwrite: bool,
) -> Result<Manifest> {
    let dir = collection_dir(location, collection);
    if !overwrite && has_data(&dir)? {
        return Err(RagError::IndexExists {
            location: location.to_path_buf(),
            collection: collection.to_string(),
        });
    }

    fs::create_dir_all(location)
        .map_err(|e| RagError::storage(location, format!("cannot create storage location: {e}")))?;

    sweep_stale_staging(location, collection);

    let staging = location.join(format!("{}{}", staging_prefix(collection), uuid::Uuid::new_v4()));
    let result = write_staging(&staging, collection, dimensions, entries)
        .and_then(|manifest| swap_into_place(&staging, &dir, overwrite).map(|()| manifest));
    if result.is_err() {
        remove_quietly(&staging);
    }
    result
}

fn staging_prefix(collection: &str) -> String {
    format!(".{collection}.tmp-")
}

/// Remove staging directories left behind by builds that never finished.
///
/// Builds of one collection are serialized by the registry, so no other
/// staging directory for it can be in use here.
fn sweep_stale_staging(location: &Path, collection: &str) {
    let prefix = staging_prefix(collection);
    let Ok(siblings) = fs::read_dir(location) else {
        return;
    };
    for sibling in siblings.flatten() {
        let is_stale = sibling.file_name().to_str().is_some_and(|name| name.starts_with(&prefix));
        if is_stale {
            debug!(path = %sibling.path().display(), "removing stale staging directory");
            remove_quietly(&sibling.path());
        }
    }
}

/// Best-effort removal; failures only leave garbage behind and are logged.
fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        warn!(path = %path.display(), error = %e, "failed to remove directory");
    }
}

fn write_staging(
    staging: &Path,
    collection: &str,
    dimensions: usize,
    entries: &[IndexEntry],
) -> Result<Manifest> {
    let io_err = |what: &str, e: std::io::Error| RagError::storage(staging, format!("{what}: {e}"));

    fs::create_dir_all(staging).map_err(|e| io_err("cannot create staging directory", e))?;

    let mut buffer = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buffer, entry)
            .map_err(|e| RagError::storage(staging, format!("cannot serialize entry: {e}")))?;
        buffer.push(b'\n');
    }

    let entries_path = staging.join(ENTRIES_FILE);
    let file = fs::File::create(&entries_path).map_err(|e| io_err("cannot create entries", e))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&buffer).map_err(|e| io_err("cannot write entries", e))?;
    writer
        .into_inner()
        .map_err(|e| io_err("cannot flush entries", e.into_error()))?
        .sync_all()
        .map_err(|e| io_err("cannot sync entries", e))?;

    let manifest = Manifest {
        format_version: FORMAT_VERSION,
        collection: collection.to_string(),
        dimensions,
        entry_count: entries.len(),
        entries_sha256: sha256_hex(&buffer),
        created_at: Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| RagError::storage(staging, format!("cannot serialize manifest: {e}")))?;
    fs::write(staging.join(MANIFEST_FILE), json).map_err(|e| io_err("cannot write manifest", e))?;

    Ok(manifest)
}

fn swap_into_place(staging: &Path, dir: &Path, overwrite: bool) -> Result<()> {
    let retired = if overwrite && dir.exists() {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("collection");
        let retired = dir.with_file_name(format!(".{name}.old-{}", uuid::Uuid::new_v4()));
        fs::rename(dir, &retired)
            .map_err(|e| RagError::storage(dir, format!("cannot retire previous index: {e}")))?;
        Some(retired)
    } else {
        if dir.exists() {
            // Only an empty directory can reach this point.
            fs::remove_dir(dir).map_err(|e| {
                RagError::storage(dir, format!("cannot replace empty directory: {e}"))
            })?;
        }
        None
    };

    if let Err(e) = fs::rename(staging, dir) {
        if let Some(retired) = &retired {
            // Put the previous collection back so it stays readable.
            if let Err(restore) = fs::rename(retired, dir) {
                error!(
                    retired = %retired.display(),
                    error = %restore,
                    "failed to restore previous index"
                );
            }
        }
        return Err(RagError::storage(dir, format!("cannot move index into place: {e}")));
    }

    if let Some(retired) = retired {
        remove_quietly(&retired);
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            chunk_index: 0,
            vector,
            text: format!("text of {id}"),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_names_that_escape_the_location() {
        assert!(validate_collection_name("sample").is_ok());
        assert!(validate_collection_name("../etc").is_err());
        assert!(validate_collection_name("a/b").is_err());
        assert!(validate_collection_name("").is_err());
    }

    #[test]
    fn written_collection_reads_back() {
        let temp = tempfile::tempdir().unwrap();
        let entries = vec![entry("a", vec![1.0, 0.0]), entry("b", vec![0.0, 1.0])];
        write_collection(temp.path(), "docs", 2, &entries, false).unwrap();

        let (manifest, loaded) =
            read_collection(&collection_dir(temp.path(), "docs"), "docs").unwrap().unwrap();
        assert_eq!(manifest.entry_count, 2);
        assert_eq!(loaded, entries);
    }

    #[test]
    fn missing_and_empty_directories_hold_nothing() {
        let temp = tempfile::tempdir().unwrap();
        assert!(read_collection(&temp.path().join("none"), "none").unwrap().is_none());
        fs::create_dir_all(temp.path().join("empty")).unwrap();
        assert!(read_collection(&temp.path().join("empty"), "empty").unwrap().is_none());
    }

    #[test]
    fn refuses_to_overwrite_without_confirmation() {
        let temp = tempfile::tempdir().unwrap();
        write_collection(temp.path(), "docs", 2, &[entry("a", vec![1.0, 0.0])], false).unwrap();
        let err = write_collection(temp.path(), "docs", 2, &[], false).unwrap_err();
        assert!(matches!(err, RagError::IndexExists { .. }));

        write_collection(temp.path(), "docs", 2, &[], true).unwrap();
        let (manifest, _) =
            read_collection(&collection_dir(temp.path(), "docs"), "docs").unwrap().unwrap();
        assert_eq!(manifest.entry_count, 0);
    }

    #[test]
    fn tampered_entries_are_reported_as_corruption() {
        let temp = tempfile::tempdir().unwrap();
        write_collection(temp.path(), "docs", 2, &[entry("a", vec![1.0, 0.0])], false).unwrap();
        let dir = collection_dir(temp.path(), "docs");
        fs::write(dir.join(ENTRIES_FILE), "{\"truncated\":").unwrap();

        let err = read_collection(&dir, "docs").unwrap_err();
        assert!(matches!(err, RagError::StorageError { .. }), "{err}");
    }

    #[test]
    fn failed_swap_puts_the_previous_collection_back() {
        let temp = tempfile::tempdir().unwrap();
        let entries = vec![entry("a", vec![1.0, 0.0])];
        write_collection(temp.path(), "docs", 2, &entries, false).unwrap();
        let dir = collection_dir(temp.path(), "docs");

        // A staging directory that does not exist makes the final rename fail.
        let missing = temp.path().join(".docs.tmp-missing");
        let err = swap_into_place(&missing, &dir, true).unwrap_err();
        assert!(matches!(err, RagError::StorageError { .. }), "{err}");

        let (_, loaded) = read_collection(&dir, "docs").unwrap().unwrap();
        assert_eq!(loaded, entries);
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".docs.old-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn stale_staging_directories_are_swept() {
        let temp = tempfile::tempdir().unwrap();
        let stale = temp.path().join(".docs.tmp-crashed");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join(ENTRIES_FILE), "partial").unwrap();
        let other = temp.path().join(".notes.tmp-crashed");
        fs::create_dir_all(&other).unwrap();

        write_collection(temp.path(), "docs", 2, &[entry("a", vec![1.0, 0.0])], false).unwrap();

        assert!(!stale.exists());
        assert!(other.exists(), "staging of another collection must be left alone");
    }

    #[test]
    fn directory_without_manifest_is_corrupt_not_empty() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("docs");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(ENTRIES_FILE), "").unwrap();

        let err = read_collection(&dir, "docs").unwrap_err();
        assert!(matches!(err, RagError::StorageError { .. }));
    }
}
