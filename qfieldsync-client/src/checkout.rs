use std::{
    io,
    path::{Path, PathBuf},
};

use qfieldsync_core::{
    CheckoutKind, CheckoutRejection, CloudProject, DirectoryInspection, SyncChoice, TransferPlan,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    catalog::{CatalogError, ProjectCatalog},
    localfs,
};

/// The user-facing side of a checkout.
pub trait CheckoutPrompter {
    /// `None` or an empty path cancels the checkout.
    fn choose_directory(&mut self, title: &str) -> Option<PathBuf>;

    fn warn(&mut self, rejection: &CheckoutRejection);

    fn confirm_sync(&mut self, project: &CloudProject) -> SyncChoice;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutDecision {
    Cancelled,
    /// `project.local_dir` is set and persisted.
    Transfer {
        project: CloudProject,
        kind: CheckoutKind,
        plan: TransferPlan,
    },
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to inspect {}: {source}", .path.display())]
    Inspect { path: PathBuf, source: io::Error },
}

/// Decides how `project` gets synced, asking the user as needed.
///
/// Nothing is persisted and no transfer is planned unless the user accepts.
pub async fn prepare_checkout(
    catalog: &ProjectCatalog,
    project: &CloudProject,
    prompter: &mut dyn CheckoutPrompter,
) -> Result<CheckoutDecision, CheckoutError> {
    if let Some(local_dir) = project.local_dir.as_deref() {
        let inspection = inspect(local_dir)?;
        match CheckoutKind::Resync.validate_directory(&inspection) {
            Ok(()) => {
                return Ok(match prompter.confirm_sync(project).plan() {
                    Some(plan) => CheckoutDecision::Transfer {
                        project: project.clone(),
                        kind: CheckoutKind::Resync,
                        plan,
                    },
                    None => {
                        info!(project_id = %project.id, "sync cancelled");
                        CheckoutDecision::Cancelled
                    }
                });
            }
            // The stored directory is gone: check out again into a new one.
            Err(rejection) => {
                warn!(project_id = %project.id, dir = %local_dir.display(), "{}", rejection);
                prompter.warn(&rejection);
            }
        }
    }

    let remote_files = catalog.list_files(&project.id).await?;
    let kind = CheckoutKind::for_project(None, &remote_files);
    let (Some(plan), Some(title)) = (kind.initial_plan(), kind.directory_prompt()) else {
        return Ok(CheckoutDecision::Cancelled);
    };

    let dir = loop {
        let Some(dir) = prompter
            .choose_directory(title)
            .filter(|dir| !dir.as_os_str().is_empty())
        else {
            info!(project_id = %project.id, "checkout cancelled");
            return Ok(CheckoutDecision::Cancelled);
        };

        let inspection = inspect(&dir)?;
        match kind.validate_directory(&inspection) {
            Ok(()) => break dir,
            Err(rejection) => {
                warn!(project_id = %project.id, dir = %dir.display(), "{}", rejection);
                prompter.warn(&rejection);
            }
        }
    };

    catalog.set_local_dir(&project.id, &dir)?;
    info!(project_id = %project.id, dir = %dir.display(), ?kind, "checkout directory accepted");

    let mut project = project.clone();
    project.local_dir = Some(dir);
    Ok(CheckoutDecision::Transfer {
        project,
        kind,
        plan,
    })
}

pub(crate) fn inspect(dir: &Path) -> Result<DirectoryInspection, CheckoutError> {
    localfs::inspect_directory(dir).map_err(|source| CheckoutError::Inspect {
        path: dir.to_owned(),
        source,
    })
}
