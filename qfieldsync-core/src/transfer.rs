use std::collections::HashMap;
use std::fmt;

use crate::{CoreError, RemoteFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    Upload,
    Download,
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPhase::Upload => write!(f, "upload"),
            TransferPhase::Download => write!(f, "download"),
        }
    }
}

/// Lifecycle of one transfer orchestrator.
///
/// `Idle -> Uploading -> UploadComplete -> Downloading -> Complete`, with a
/// download-only transfer going straight from `Idle` to `Downloading`.
/// `Aborted` is reachable from every state and is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Uploading,
    UploadComplete,
    Downloading,
    Complete,
    Aborted,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Uploading => "uploading",
            TransferState::UploadComplete => "upload-complete",
            TransferState::Downloading => "downloading",
            TransferState::Complete => "complete",
            TransferState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

impl TransferState {
    pub fn begin_upload(self) -> Result<Self, CoreError> {
        match self {
            TransferState::Idle => Ok(TransferState::Uploading),
            from => Err(CoreError::InvalidTransition {
                from,
                action: "start upload",
            }),
        }
    }

    /// The upload pass ended, successfully or not.
    pub fn finish_upload(self) -> Result<Self, CoreError> {
        match self {
            TransferState::Uploading => Ok(TransferState::UploadComplete),
            from => Err(CoreError::InvalidTransition {
                from,
                action: "finish upload",
            }),
        }
    }

    pub fn begin_download(self) -> Result<Self, CoreError> {
        match self {
            TransferState::Idle | TransferState::UploadComplete => Ok(TransferState::Downloading),
            from => Err(CoreError::InvalidTransition {
                from,
                action: "start download",
            }),
        }
    }

    pub fn finish_download(self) -> Result<Self, CoreError> {
        match self {
            TransferState::Downloading => Ok(TransferState::Complete),
            from => Err(CoreError::InvalidTransition {
                from,
                action: "finish download",
            }),
        }
    }

    pub fn finish(self, phase: TransferPhase) -> Result<Self, CoreError> {
        match phase {
            TransferPhase::Upload => self.finish_upload(),
            TransferPhase::Download => self.finish_download(),
        }
    }

    pub fn abort(self) -> Self {
        TransferState::Aborted
    }

    pub fn is_running(self) -> bool {
        matches!(self, TransferState::Uploading | TransferState::Downloading)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    UploadOnly,
    DownloadOnly,
    UploadThenDownload,
}

/// Which remote files the download pass fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPolicy {
    /// Only files that do not exist locally; local copies win.
    MissingOnly,
    /// Every file whose local content differs from the current remote version.
    OverwriteChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub direction: TransferDirection,
    /// On conflict the local copy wins.
    pub replace_remote_files: bool,
}

impl TransferPlan {
    pub fn upload_initialize() -> Self {
        Self {
            direction: TransferDirection::UploadOnly,
            replace_remote_files: true,
        }
    }

    pub fn download_initialize() -> Self {
        Self {
            direction: TransferDirection::DownloadOnly,
            replace_remote_files: false,
        }
    }

    pub fn resync(replace_remote_files: bool) -> Self {
        Self {
            direction: TransferDirection::UploadThenDownload,
            replace_remote_files,
        }
    }

    pub fn uploads(&self) -> bool {
        matches!(
            self.direction,
            TransferDirection::UploadOnly | TransferDirection::UploadThenDownload
        )
    }

    pub fn downloads(&self) -> bool {
        matches!(
            self.direction,
            TransferDirection::DownloadOnly | TransferDirection::UploadThenDownload
        )
    }

    pub fn upload_all(&self) -> bool {
        self.replace_remote_files
    }

    pub fn download_policy(&self) -> DownloadPolicy {
        if self.replace_remote_files {
            DownloadPolicy::MissingOnly
        } else {
            DownloadPolicy::OverwriteChanged
        }
    }
}

/// A file found below a project's local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    /// Relative name with `/` separators, as used remotely.
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub bytes: u64,
    pub skipped: usize,
}

/// Local files the upload pass sends.
///
/// `upload_all` sends everything; otherwise only files the remote lacks.
pub fn plan_uploads<'a>(
    local: &'a [LocalFile],
    remote: &[RemoteFile],
    upload_all: bool,
) -> Vec<&'a LocalFile> {
    if upload_all {
        return local.iter().collect();
    }

    let remote_names = remote
        .iter()
        .map(|file| file.name.as_str())
        .collect::<std::collections::HashSet<_>>();
    local
        .iter()
        .filter(|file| !remote_names.contains(file.name.as_str()))
        .collect()
}

/// Remote files the download pass fetches.
pub fn plan_downloads<'a>(
    local: &[LocalFile],
    remote: &'a [RemoteFile],
    policy: DownloadPolicy,
) -> Vec<&'a RemoteFile> {
    let local_hashes = local
        .iter()
        .map(|file| (file.name.as_str(), file.sha256.as_str()))
        .collect::<HashMap<_, _>>();

    remote
        .iter()
        .filter(|file| match local_hashes.get(file.name.as_str()) {
            None => true,
            Some(local_hash) => match policy {
                DownloadPolicy::MissingOnly => false,
                DownloadPolicy::OverwriteChanged => file.current_sha256() != Some(*local_hash),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::RemoteFileVersion;

    fn local(name: &str, hash: &str) -> LocalFile {
        LocalFile {
            name: name.to_owned(),
            size: 4,
            sha256: hash.to_owned(),
        }
    }

    fn remote(name: &str, hash: Option<&str>) -> RemoteFile {
        RemoteFile {
            name: name.to_owned(),
            size: 4,
            versions: vec![RemoteFileVersion {
                size: 4,
                created_at: Utc::now(),
                sha256: hash.map(str::to_owned),
            }],
        }
    }

    #[test]
    fn upload_then_download_sequence() {
        let state = TransferState::Idle.begin_upload().unwrap();
        assert!(state.is_running());
        let state = state.finish_upload().unwrap();
        assert_eq!(state, TransferState::UploadComplete);
        let state = state.begin_download().unwrap();
        assert_eq!(state.finish_download().unwrap(), TransferState::Complete);
    }

    #[test]
    fn download_cannot_start_while_uploading() {
        let err = TransferState::Uploading.begin_download().unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: TransferState::Uploading,
                action: "start download",
            }
        );
    }

    #[test]
    fn upload_cannot_start_twice() {
        assert!(TransferState::Uploading.begin_upload().is_err());
        assert!(TransferState::UploadComplete.begin_upload().is_err());
    }

    #[test]
    fn aborted_is_final() {
        let state = TransferState::Idle.abort();
        assert_eq!(state, TransferState::Aborted);
        assert!(state.begin_upload().is_err());
        assert!(state.begin_download().is_err());
        assert!(state.finish(TransferPhase::Upload).is_err());
        assert_eq!(state.abort(), TransferState::Aborted);
    }

    #[test]
    fn upload_plan_without_upload_all_skips_known_files() {
        let locals = vec![local("a.qgs", "1"), local("b.gpkg", "2")];
        let remotes = vec![remote("a.qgs", Some("0"))];

        let partial = plan_uploads(&locals, &remotes, false);
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].name, "b.gpkg");

        assert_eq!(plan_uploads(&locals, &remotes, true).len(), 2);
    }

    #[test]
    fn download_plan_respects_policy() {
        let locals = vec![local("same.gpkg", "s"), local("changed.gpkg", "old")];
        let remotes = vec![
            remote("same.gpkg", Some("s")),
            remote("changed.gpkg", Some("new")),
            remote("new.gpkg", Some("n")),
            remote("unhashed.gpkg", None),
        ];

        let names = |files: Vec<&RemoteFile>| {
            files
                .into_iter()
                .map(|f| f.name.clone())
                .collect::<Vec<_>>()
        };

        assert_eq!(
            names(plan_downloads(&locals, &remotes, DownloadPolicy::MissingOnly)),
            vec!["new.gpkg", "unhashed.gpkg"]
        );
        assert_eq!(
            names(plan_downloads(
                &locals,
                &remotes,
                DownloadPolicy::OverwriteChanged
            )),
            vec!["changed.gpkg", "new.gpkg", "unhashed.gpkg"]
        );
    }
}
