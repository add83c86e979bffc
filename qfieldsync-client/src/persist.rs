use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Upper bound for config and preference files read from disk.
pub const MAX_SAVED_FILE_BYTES: u64 = 64 * 1024;

const MAX_SAVE_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("metadata read failed for {}: {source}", .path.display())]
    Metadata { path: PathBuf, source: io::Error },
    #[error("file {} too large: {size} bytes (max {max})", .path.display())]
    TooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("read failed for {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("parse failed for {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("serialize failed: {0}")]
    Serialize(serde_json::Error),
    #[error("tmp write failed for {}: {source}", .path.display())]
    WriteTmp { path: PathBuf, source: io::Error },
    #[error("rename into {} failed: {source}", .path.display())]
    Rename { path: PathBuf, source: io::Error },
}

/// Loads a JSON file, `Ok(None)` when it does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PersistError::Metadata {
                path: path.to_owned(),
                source,
            });
        }
    };
    if meta.len() > MAX_SAVED_FILE_BYTES {
        return Err(PersistError::TooLarge {
            path: path.to_owned(),
            size: meta.len(),
            max: MAX_SAVED_FILE_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(|source| PersistError::Read {
        path: path.to_owned(),
        source,
    })?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| PersistError::Parse {
            path: path.to_owned(),
            source,
        })
}

/// Writes through a temp file and renames it into place.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(value).map_err(PersistError::Serialize)?;
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    fs::write(&tmp, payload.as_bytes()).map_err(|source| PersistError::WriteTmp {
        path: tmp.clone(),
        source,
    })?;

    // Rename replaces the destination atomically everywhere but Windows.
    if cfg!(windows) && path.exists() {
        let _ = fs::remove_file(path);
    }

    fs::rename(&tmp, path).map_err(|source| PersistError::Rename {
        path: path.to_owned(),
        source,
    })
}

pub fn save_json_with_retry<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let mut attempt: u32 = 1;
    loop {
        match save_json(path, value) {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= MAX_SAVE_ATTEMPTS => return Err(err),
            Err(_) => {
                let backoff_ms = BACKOFF_BASE_MS.saturating_mul(1_u64 << (attempt - 1));
                std::thread::sleep(Duration::from_millis(backoff_ms));
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_replaces_existing_file_without_leftovers() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let path = dir.path().join("prefs.json");

        save_json(&path, &vec!["first"]).unwrap();
        save_json(&path, &vec!["second", "third"]).unwrap();

        let loaded: Option<Vec<String>> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(vec!["second".to_owned(), "third".to_owned()]));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().expect("create tempdir");
        let loaded: Option<Vec<String>> = load_json(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, None);
    }
}
