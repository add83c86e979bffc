use std::{
    io,
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use qfieldsync_core::{
    CloudError, CloudProject, CoreError, DownloadPolicy, LocalFile, ProjectId, TransferPhase,
    TransferState, TransferSummary, plan_downloads, plan_uploads,
};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

use crate::{
    api::CloudClient,
    localfs::{self, local_path_for, write_file_atomic},
};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("project {0} has no local directory")]
    NoLocalDir(ProjectId),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{phase} of {} failed: {source}", .file.as_deref().unwrap_or("file list"))]
    Cloud {
        phase: TransferPhase,
        file: Option<String>,
        source: CloudError,
    },
    #[error("local file {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("transfer task failed: {0}")]
    Task(String),
}

#[derive(Debug)]
pub enum TransferEvent {
    Progress {
        phase: TransferPhase,
        file: String,
        /// Zero-based position of `file` in this pass.
        index: usize,
        total: usize,
    },
    /// Exactly one per started pass, never after an abort.
    Finished {
        phase: TransferPhase,
        result: Result<TransferSummary, TransferError>,
    },
}

/// Runs the upload and download passes of one sync attempt.
///
/// Each pass runs in its own task and reports through the event channel
/// returned by [`ProjectTransferrer::new`].
#[derive(Debug)]
pub struct ProjectTransferrer {
    pass: PassContext,
    download_policy: DownloadPolicy,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone)]
struct PassContext {
    client: CloudClient,
    project_id: ProjectId,
    local_dir: PathBuf,
    state: Arc<Mutex<TransferState>>,
    events_tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ProjectTransferrer {
    pub fn new(
        client: CloudClient,
        project: &CloudProject,
        download_policy: DownloadPolicy,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransferEvent>), TransferError> {
        let local_dir = project
            .local_dir
            .clone()
            .ok_or_else(|| TransferError::NoLocalDir(project.id.clone()))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let transferrer = Self {
            pass: PassContext {
                client,
                project_id: project.id.clone(),
                local_dir,
                state: Arc::new(Mutex::new(TransferState::Idle)),
                events_tx,
            },
            download_policy,
            task: None,
        };
        Ok((transferrer, events_rx))
    }

    pub fn state(&self) -> TransferState {
        *self.pass.lock_state()
    }

    /// Sends local files to the remote project: all of them with
    /// `upload_all`, otherwise only those the remote lacks.
    pub fn upload(&mut self, upload_all: bool) -> Result<(), TransferError> {
        self.pass.transition(TransferState::begin_upload)?;
        info!(project_id = %self.pass.project_id, upload_all, "upload started");

        let pass = self.pass.clone();
        self.task = Some(tokio::spawn(async move {
            let result = pass.upload(upload_all).await;
            pass.finish(TransferPhase::Upload, result);
        }));
        Ok(())
    }

    /// Fetches remote files into the local directory. Allowed on a fresh
    /// orchestrator or once the upload pass has finished.
    pub fn download(&mut self) -> Result<(), TransferError> {
        self.pass.transition(TransferState::begin_download)?;
        info!(project_id = %self.pass.project_id, policy = ?self.download_policy, "download started");

        let pass = self.pass.clone();
        let policy = self.download_policy;
        self.task = Some(tokio::spawn(async move {
            let result = pass.download(policy).await;
            pass.finish(TransferPhase::Download, result);
        }));
        Ok(())
    }

    /// Resolves when the running pass task exits, with the join error if it
    /// panicked or was cancelled. Never resolves while no pass is running.
    pub(crate) async fn pass_exited(&mut self) -> Option<JoinError> {
        let Some(task) = self.task.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = task.await;
        self.task = None;
        outcome.err()
    }

    /// Cancels outstanding work. Safe to call in any state, repeatedly.
    pub fn abort_requests(&mut self) {
        {
            let mut state = self.pass.lock_state();
            if *state != TransferState::Aborted {
                info!(project_id = %self.pass.project_id, from = %*state, "transfer aborted");
            }
            *state = state.abort();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ProjectTransferrer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl PassContext {
    fn lock_state(&self) -> MutexGuard<'_, TransferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(
        &self,
        step: impl FnOnce(TransferState) -> Result<TransferState, CoreError>,
    ) -> Result<(), TransferError> {
        let mut state = self.lock_state();
        match step(*state) {
            Ok(next) => {
                *state = next;
                Ok(())
            }
            Err(err) => {
                error!(project_id = %self.project_id, "{}", err);
                Err(err.into())
            }
        }
    }

    fn progress(&self, phase: TransferPhase, file: &str, index: usize, total: usize) {
        let state = self.lock_state();
        if *state == TransferState::Aborted {
            return;
        }
        let _ = self.events_tx.send(TransferEvent::Progress {
            phase,
            file: file.to_owned(),
            index,
            total,
        });
    }

    /// Publishes the terminal event. The state lock is held across the send
    /// so it cannot interleave with an abort.
    fn finish(&self, phase: TransferPhase, result: Result<TransferSummary, TransferError>) {
        let mut state = self.lock_state();
        if *state == TransferState::Aborted {
            debug!(project_id = %self.project_id, %phase, "dropping completion of aborted pass");
            return;
        }
        match state.finish(phase) {
            Ok(next) => *state = next,
            Err(err) => {
                error!(project_id = %self.project_id, "{}", err);
                return;
            }
        }

        match &result {
            Ok(summary) => info!(
                project_id = %self.project_id,
                %phase,
                files = summary.files,
                bytes = summary.bytes,
                skipped = summary.skipped,
                "pass finished"
            ),
            Err(err) => warn!(project_id = %self.project_id, %phase, "pass failed: {}", err),
        }
        let _ = self.events_tx.send(TransferEvent::Finished { phase, result });
    }

    async fn scan_local(&self) -> Result<Vec<LocalFile>, TransferError> {
        let dir = self.local_dir.clone();
        tokio::task::spawn_blocking(move || localfs::scan_local_files(&dir))
            .await
            .map_err(|err| TransferError::Task(err.to_string()))?
            .map_err(|source| TransferError::Io {
                path: self.local_dir.clone(),
                source,
            })
    }

    async fn upload(&self, upload_all: bool) -> Result<TransferSummary, TransferError> {
        let phase = TransferPhase::Upload;
        let remote = self
            .client
            .list_files(&self.project_id)
            .await
            .map_err(|source| TransferError::Cloud {
                phase,
                file: None,
                source,
            })?;
        let local = self.scan_local().await?;
        let planned = plan_uploads(&local, &remote, upload_all);

        let mut summary = TransferSummary {
            skipped: local.len() - planned.len(),
            ..TransferSummary::default()
        };
        let total = planned.len();
        for (index, file) in planned.into_iter().enumerate() {
            self.progress(phase, &file.name, index, total);

            let path = local_path_for(&self.local_dir, &file.name)?;
            let content = tokio::fs::read(&path)
                .await
                .map_err(|source| TransferError::Io {
                    path: path.clone(),
                    source,
                })?;
            let bytes = content.len() as u64;

            self.client
                .upload_file(&self.project_id, &file.name, content)
                .await
                .map_err(|source| TransferError::Cloud {
                    phase,
                    file: Some(file.name.clone()),
                    source,
                })?;
            summary.files += 1;
            summary.bytes += bytes;
        }
        Ok(summary)
    }

    async fn download(&self, policy: DownloadPolicy) -> Result<TransferSummary, TransferError> {
        let phase = TransferPhase::Download;
        let remote = self
            .client
            .list_files(&self.project_id)
            .await
            .map_err(|source| TransferError::Cloud {
                phase,
                file: None,
                source,
            })?;
        let local = self.scan_local().await?;
        let planned = plan_downloads(&local, &remote, policy);

        let mut summary = TransferSummary {
            skipped: remote.len() - planned.len(),
            ..TransferSummary::default()
        };
        let total = planned.len();
        for (index, file) in planned.into_iter().enumerate() {
            self.progress(phase, &file.name, index, total);

            let path = local_path_for(&self.local_dir, &file.name)?;
            let content = self
                .client
                .download_file(&self.project_id, &file.name)
                .await
                .map_err(|source| TransferError::Cloud {
                    phase,
                    file: Some(file.name.clone()),
                    source,
                })?;
            write_file_atomic(&path, &content)
                .await
                .map_err(|source| TransferError::Io {
                    path: path.clone(),
                    source,
                })?;
            summary.files += 1;
            summary.bytes += content.len() as u64;
        }
        Ok(summary)
    }
}
