use std::io;

use qfieldsync_core::{
    CheckoutKind, CheckoutRejection, CloudError, CloudProject, TransferPlan, UserInfo,
};
use thiserror::Error;

use crate::{
    api::CloudClient,
    catalog::{CatalogError, ProjectCatalog},
    checkout::{self, CheckoutDecision, CheckoutError, CheckoutPrompter, prepare_checkout},
    config::{ClientConfig, ConfigError},
    preferences::PreferencesStore,
    session::{AuthOutcome, SessionController, SessionError},
    sync::{SyncController, SyncError, SyncHandle},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("unknown project {0}")]
    UnknownProject(String),
    #[error("Not logged in{}. Run `qfieldsync login` first.", reason_suffix(.reason))]
    NotLoggedIn { reason: Option<String> },
    #[error("project {0} has no local directory; check it out first")]
    NotCheckedOut(String),
    #[error("{}: {}", .0.title(), .0)]
    Rejected(#[from] CheckoutRejection),
    #[error("failed to read from terminal: {0}")]
    Terminal(#[from] io::Error),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|reason| format!(" ({reason})"))
        .unwrap_or_default()
}

/// One client session: API client, preferences, auth, catalog and the sync
/// slot, all sharing the same token and preferences file.
#[derive(Debug)]
pub struct CloudSync {
    config: ClientConfig,
    client: CloudClient,
    preferences: PreferencesStore,
    session: SessionController,
    catalog: ProjectCatalog,
    sync: SyncController,
}

impl CloudSync {
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        let client = CloudClient::new(&config)?;
        let preferences = PreferencesStore::open_or_default(config.preferences_path());
        Ok(Self::with_parts(config, client, preferences))
    }

    pub fn with_parts(
        config: ClientConfig,
        client: CloudClient,
        preferences: PreferencesStore,
    ) -> Self {
        Self {
            session: SessionController::new(client.clone(), preferences.clone()),
            catalog: ProjectCatalog::new(client.clone(), preferences.clone()),
            sync: SyncController::new(client.clone()),
            config,
            client,
            preferences,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    pub fn preferences(&self) -> &PreferencesStore {
        &self.preferences
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn catalog(&self) -> &ProjectCatalog {
        &self.catalog
    }

    pub fn sync(&self) -> &SyncController {
        &self.sync
    }

    /// Reuses the remembered token; fails when credentials are needed.
    pub async fn ensure_authenticated(&self) -> Result<UserInfo, AppError> {
        match self.session.authenticate().await? {
            AuthOutcome::Authenticated(user) => Ok(user),
            AuthOutcome::CredentialsRequired { reason, .. } => Err(AppError::NotLoggedIn { reason }),
        }
    }

    /// Logs out and forgets the cached catalog.
    pub async fn logout(&self) -> Result<(), AppError> {
        self.session.logout().await?;
        self.catalog.reset();
        Ok(())
    }

    /// Looks a project up in the cached catalog, refreshing it on a miss.
    pub async fn project(&self, project_id: &str) -> Result<CloudProject, AppError> {
        if let Some(project) = self.catalog.find(project_id) {
            return Ok(project);
        }
        self.catalog
            .list()
            .await?
            .into_iter()
            .find(|p| p.id == project_id)
            .ok_or_else(|| AppError::UnknownProject(project_id.to_owned()))
    }

    /// Runs the checkout dialog for `project` and claims the sync slot when
    /// the user accepts. `Ok(None)` means the user cancelled.
    pub async fn checkout(
        &self,
        project: &CloudProject,
        prompter: &mut dyn CheckoutPrompter,
    ) -> Result<Option<SyncHandle>, AppError> {
        self.sync.ensure_idle()?;
        match prepare_checkout(&self.catalog, project, prompter).await? {
            CheckoutDecision::Cancelled => Ok(None),
            CheckoutDecision::Transfer { project, plan, .. } => {
                Ok(Some(self.sync.start(&project, plan)?))
            }
        }
    }

    /// Syncs an already checked out project without prompting.
    pub async fn resync(
        &self,
        project_id: &str,
        replace_remote_files: bool,
    ) -> Result<SyncHandle, AppError> {
        let project = self.project(project_id).await?;
        let Some(local_dir) = project.local_dir.as_deref() else {
            return Err(AppError::NotCheckedOut(project.id.clone()));
        };
        CheckoutKind::Resync.validate_directory(&checkout::inspect(local_dir)?)?;
        Ok(self
            .sync
            .start(&project, TransferPlan::resync(replace_remote_files))?)
    }
}
