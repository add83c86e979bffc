use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{RemoteFile, TransferPlan};

/// Extensions of QGIS project files, matched case-insensitively.
pub const PROJECT_FILE_EXTENSIONS: [&str; 2] = ["qgs", "qgz"];

pub fn is_project_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            PROJECT_FILE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// How a selected project gets associated with (or synced to) a local directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutKind {
    /// Remote has no files: push a local project into it.
    UploadInitialize,
    /// Remote has files: pull them into an empty directory.
    DownloadInitialize,
    /// Project already has a local directory.
    Resync,
}

impl CheckoutKind {
    pub fn for_project(local_dir: Option<&Path>, remote_files: &[RemoteFile]) -> Self {
        if local_dir.is_some() {
            CheckoutKind::Resync
        } else if remote_files.is_empty() {
            CheckoutKind::UploadInitialize
        } else {
            CheckoutKind::DownloadInitialize
        }
    }

    /// Title for the directory picker. `Resync` reuses the stored directory.
    pub fn directory_prompt(self) -> Option<&'static str> {
        match self {
            CheckoutKind::UploadInitialize => Some("Upload local project to QFieldCloud"),
            CheckoutKind::DownloadInitialize => Some("Save QFieldCloud project at"),
            CheckoutKind::Resync => None,
        }
    }

    /// Checks a user-chosen directory against this checkout's preconditions.
    pub fn validate_directory(
        self,
        inspection: &DirectoryInspection,
    ) -> Result<(), CheckoutRejection> {
        if !inspection.is_dir {
            return Err(CheckoutRejection::MissingDirectory(inspection.path.clone()));
        }

        match self {
            CheckoutKind::UploadInitialize => {
                let count = inspection.project_files.len();
                if count > 1 {
                    return Err(CheckoutRejection::MultipleProjectFiles { count });
                }
                Ok(())
            }
            CheckoutKind::DownloadInitialize => {
                if inspection.entry_count > 0 {
                    return Err(CheckoutRejection::DirectoryNotEmpty {
                        entries: inspection.entry_count,
                    });
                }
                Ok(())
            }
            CheckoutKind::Resync => Ok(()),
        }
    }

    /// Plan for a first checkout. `Resync` needs a [`SyncChoice`] instead.
    pub fn initial_plan(self) -> Option<TransferPlan> {
        match self {
            CheckoutKind::UploadInitialize => Some(TransferPlan::upload_initialize()),
            CheckoutKind::DownloadInitialize => Some(TransferPlan::download_initialize()),
            CheckoutKind::Resync => None,
        }
    }
}

/// What the local filesystem looks like at a candidate checkout directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryInspection {
    pub path: PathBuf,
    pub is_dir: bool,
    /// Direct children, files and directories alike.
    pub entry_count: usize,
    /// Project files anywhere below `path`.
    pub project_files: Vec<PathBuf>,
}

/// A chosen directory that cannot be used; the user is asked again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckoutRejection {
    #[error("The selected directory {} does not exist.", .0.display())]
    MissingDirectory(PathBuf),
    #[error(
        "When QFieldCloud project has no remote files, the local checkout directory may contain no more than 1 QGIS project (found {count})."
    )]
    MultipleProjectFiles { count: usize },
    #[error(
        "When QFieldCloud project contains remote files the checkout destination needs to be an empty directory."
    )]
    DirectoryNotEmpty { entries: usize },
}

impl CheckoutRejection {
    pub fn title(&self) -> &'static str {
        match self {
            CheckoutRejection::MissingDirectory(_) => "Directory not found",
            CheckoutRejection::MultipleProjectFiles { .. } => "Multiple QGIS projects",
            CheckoutRejection::DirectoryNotEmpty { .. } => {
                "QFieldSync checkout requires empty directory"
            }
        }
    }
}

/// Answer to "replace remote files with the local version?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncChoice {
    ReplaceRemote,
    ReplaceLocal,
    Cancel,
}

impl SyncChoice {
    pub fn plan(self) -> Option<TransferPlan> {
        match self {
            SyncChoice::ReplaceRemote => Some(TransferPlan::resync(true)),
            SyncChoice::ReplaceLocal => Some(TransferPlan::resync(false)),
            SyncChoice::Cancel => None,
        }
    }
}
