use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};

use qfieldsync_core::{CloudError, CloudProject, ProjectPayload, RemoteFile};
use thiserror::Error;
use tracing::{info, warn};

use crate::{api::CloudClient, persist::PersistError, preferences::PreferencesStore};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Project refresh failed: {0}")]
    List(CloudError),
    #[error("Project create failed: {0}")]
    Create(CloudError),
    #[error("Project update failed: {0}")]
    Update(CloudError),
    #[error("Project delete failed: {0}")]
    Delete(CloudError),
    #[error("Obtaining project files list failed: {0}")]
    Files(CloudError),
    #[error("failed to save local directory: {0}")]
    Preferences(#[from] PersistError),
}

/// Remote projects visible to the current session, joined with the local
/// directories stored in the preferences.
#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    client: CloudClient,
    preferences: PreferencesStore,
    projects: Arc<Mutex<Vec<CloudProject>>>,
}

impl ProjectCatalog {
    pub fn new(client: CloudClient, preferences: PreferencesStore) -> Self {
        Self {
            client,
            preferences,
            projects: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fetches every project. An empty catalog is not an error.
    pub async fn list(&self) -> Result<Vec<CloudProject>, CatalogError> {
        let mut projects = self.client.list_projects().await.map_err(CatalogError::List)?;
        for project in &mut projects {
            project.local_dir = self.preferences.local_dir(&project.id);
        }

        info!(count = projects.len(), "projects refreshed");
        *self.lock() = projects.clone();
        Ok(projects)
    }

    /// Last fetched catalog.
    pub fn projects(&self) -> Vec<CloudProject> {
        self.lock().clone()
    }

    pub fn find(&self, project_id: &str) -> Option<CloudProject> {
        self.lock().iter().find(|p| p.id == project_id).cloned()
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Creates a project; a given `local_dir` is bound to the new id.
    pub async fn create(
        &self,
        payload: &ProjectPayload,
        local_dir: Option<&Path>,
    ) -> Result<CloudProject, CatalogError> {
        let mut project = self
            .client
            .create_project(payload)
            .await
            .map_err(CatalogError::Create)?;

        if let Some(dir) = local_dir.filter(|dir| !dir.as_os_str().is_empty()) {
            self.preferences.set_local_dir(&project.id, dir)?;
            project.local_dir = Some(dir.to_owned());
        }

        info!(project_id = %project.id, name = %project.name, "project created");
        Ok(project)
    }

    pub async fn update(
        &self,
        project_id: &str,
        payload: &ProjectPayload,
    ) -> Result<CloudProject, CatalogError> {
        let mut project = self
            .client
            .update_project(project_id, payload)
            .await
            .map_err(CatalogError::Update)?;
        project.local_dir = self.preferences.local_dir(&project.id);

        let mut cached = self.lock();
        if let Some(slot) = cached.iter_mut().find(|p| p.id == project.id) {
            *slot = project.clone();
        }
        drop(cached);

        info!(project_id = %project.id, "project updated");
        Ok(project)
    }

    /// Deletes remotely. The caller refreshes with [`ProjectCatalog::list`].
    pub async fn delete(&self, project_id: &str) -> Result<(), CatalogError> {
        if let Err(err) = self.client.delete_project(project_id).await {
            warn!(project_id = %project_id, "project delete failed: {}", err);
            return Err(CatalogError::Delete(err));
        }
        info!(project_id = %project_id, "project deleted");
        Ok(())
    }

    /// Files of a project, each with its versions oldest first. Empty means
    /// the project has no files yet.
    pub async fn list_files(&self, project_id: &str) -> Result<Vec<RemoteFile>, CatalogError> {
        self.client
            .list_files(project_id)
            .await
            .map_err(CatalogError::Files)
    }

    pub fn set_local_dir(&self, project_id: &str, dir: &Path) -> Result<(), CatalogError> {
        self.preferences.set_local_dir(project_id, dir)?;
        let mut cached = self.lock();
        if let Some(slot) = cached.iter_mut().find(|p| p.id == project_id) {
            slot.local_dir = Some(dir.to_owned());
        }
        Ok(())
    }

    pub fn local_dir(&self, project_id: &str) -> Option<PathBuf> {
        self.preferences.local_dir(project_id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CloudProject>> {
        self.projects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
