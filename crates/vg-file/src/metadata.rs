//! Dataset metadata files
//!
//! A metadata file is a JSON array of `[path, frames]` pairs, one per audio
//! file. Paired datasets keep the low-resolution list in `filtered.json` and
//! the high-resolution list in `raw.json` inside the same directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{FileError, FileResult};

/// Low-resolution (input) metadata file name
pub const LOW_RES_META: &str = "filtered.json";
/// High-resolution (target) metadata file name
pub const HIGH_RES_META: &str = "raw.json";

/// One audio file and its length in sample frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(PathBuf, u64)", into = "(PathBuf, u64)")]
pub struct MetaEntry {
    pub path: PathBuf,
    pub frames: u64,
}

impl MetaEntry {
    pub fn new(path: impl Into<PathBuf>, frames: u64) -> Self {
        Self {
            path: path.into(),
            frames,
        }
    }

    /// File name component used to pair entries across lists
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl From<(PathBuf, u64)> for MetaEntry {
    fn from((path, frames): (PathBuf, u64)) -> Self {
        Self { path, frames }
    }
}

impl From<MetaEntry> for (PathBuf, u64) {
    fn from(entry: MetaEntry) -> Self {
        (entry.path, entry.frames)
    }
}

/// Load a metadata file
pub fn read_meta<P: AsRef<Path>>(path: P) -> FileResult<Vec<MetaEntry>> {
    let path = path.as_ref();
    let json = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FileError::NotFound(path.display().to_string()),
        _ => FileError::Io(e),
    })?;
    Ok(serde_json::from_str(&json)?)
}

/// Write a metadata file (pretty printed), creating parent directories
pub fn write_meta<P: AsRef<Path>>(path: P, entries: &[MetaEntry]) -> FileResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(entries)?;
    fs::write(path, json)?;
    log::debug!("Wrote {} metadata entries to {}", entries.len(), path.display());
    Ok(())
}

/// Load the `(low-res, high-res)` lists from a paired metadata directory
pub fn read_pair_dir<P: AsRef<Path>>(dir: P) -> FileResult<(Vec<MetaEntry>, Vec<MetaEntry>)> {
    let dir = dir.as_ref();
    let low = read_meta(dir.join(LOW_RES_META))?;
    let high = read_meta(dir.join(HIGH_RES_META))?;
    Ok((low, high))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_format() {
        let entries = vec![MetaEntry::new("/data/a.wav", 32000)];
        let json = serde_json::to_string(&entries).unwrap();
        assert_eq!(json, r#"[["/data/a.wav",32000]]"#);

        let parsed: Vec<MetaEntry> = serde_json::from_str(r#"[["x/b.wav", 5]]"#).unwrap();
        assert_eq!(parsed[0].frames, 5);
        assert_eq!(parsed[0].file_name(), "b.wav");
        assert_eq!(parsed[0].stem(), "b");
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tr").join("raw.json");
        let entries = vec![MetaEntry::new("a.wav", 1), MetaEntry::new("b.wav", 2)];

        write_meta(&path, &entries).unwrap();
        assert_eq!(read_meta(&path).unwrap(), entries);
    }

    #[test]
    fn test_missing_meta_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_pair_dir(dir.path()).unwrap_err();
        assert!(matches!(err, FileError::NotFound(_)));
    }

    #[test]
    fn test_malformed_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        fs::write(&path, r#"{"not": "a list"}"#).unwrap();
        assert!(matches!(read_meta(&path), Err(FileError::JsonError(_))));
    }
}
