use std::{
    fs, io,
    path::{Path, PathBuf},
};

use qfieldsync_core::{
    DirectoryInspection, LocalFile, is_project_file, remote_name_from_relative, sha256_hex,
    validate_remote_name,
};
use walkdir::WalkDir;

/// Suffix of partially downloaded files; never uploaded.
pub const PARTIAL_SUFFIX: &str = ".qfieldsync-part";

pub fn inspect_directory(path: &Path) -> io::Result<DirectoryInspection> {
    if !path.is_dir() {
        return Ok(DirectoryInspection {
            path: path.to_owned(),
            is_dir: false,
            entry_count: 0,
            project_files: Vec::new(),
        });
    }

    let entry_count = fs::read_dir(path)?.count();
    let project_files = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_project_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();

    Ok(DirectoryInspection {
        path: path.to_owned(),
        is_dir: true,
        entry_count,
        project_files,
    })
}

/// Every regular file below `root`, hashed, sorted by remote name.
pub fn scan_local_files(root: &Path) -> io::Result<Vec<LocalFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let Some(name) = remote_name_from_relative(relative) else {
            tracing::warn!(path = %entry.path().display(), "skipping file with non UTF-8 name");
            continue;
        };
        if name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        if let Err(err) = validate_remote_name(&name) {
            tracing::warn!(path = %entry.path().display(), "skipping file: {}", err);
            continue;
        }

        let content = fs::read(entry.path())?;
        files.push(LocalFile {
            name,
            size: content.len() as u64,
            sha256: sha256_hex(&content),
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Absolute path of a remote file inside the checkout directory.
pub fn local_path_for(root: &Path, remote_name: &str) -> Result<PathBuf, qfieldsync_core::CoreError> {
    Ok(root.join(validate_remote_name(remote_name)?))
}

/// Writes next to the destination, then renames over it.
pub async fn write_file_atomic(destination: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = destination.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    tokio::fs::write(&partial, content).await?;
    if let Err(err) = tokio::fs::rename(&partial, destination).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    Ok(())
}
